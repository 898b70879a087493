use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::MqttSettings;
use crate::supervisor::Supervisor;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unrecognised command: {0}")]
    Unknown(String),
}

/// The typed shape of one command-channel message, per §4.6. `command` tags
/// the variant; the remaining fields are read on demand so an unrecognised
/// `command` value still deserialises far enough to be reported by name.
#[derive(Debug, Deserialize)]
struct RawCommand {
    command: serde_json::Value,
    #[serde(default)]
    line_ids: Vec<String>,
    #[serde(default)]
    line_id: Option<String>,
    #[serde(default)]
    cadence_ms: Option<u64>,
}

#[derive(Debug, PartialEq)]
enum Command {
    PauseLine(Vec<String>),
    ResumeLine(Vec<String>),
    SetCadence(String, u64),
    StopLine(Vec<String>),
    RestartLine(Vec<String>),
}

fn parse_command(payload: &[u8]) -> Result<Command, CommandError> {
    let raw: RawCommand = serde_json::from_slice(payload)?;
    let name = raw
        .command
        .as_str()
        .ok_or_else(|| CommandError::Unknown(raw.command.to_string()))?;
    match name {
        "pause_line" => Ok(Command::PauseLine(raw.line_ids)),
        "resume_line" => Ok(Command::ResumeLine(raw.line_ids)),
        "stop_line" => Ok(Command::StopLine(raw.line_ids)),
        "restart_line" => Ok(Command::RestartLine(raw.line_ids)),
        "set_cadence" => {
            let line_id = raw
                .line_id
                .ok_or_else(|| CommandError::Unknown("set_cadence missing line_id".to_string()))?;
            let cadence_ms = raw
                .cadence_ms
                .ok_or_else(|| CommandError::Unknown("set_cadence missing cadence_ms".to_string()))?;
            Ok(Command::SetCadence(line_id, cadence_ms))
        }
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

async fn dispatch(supervisor: &Mutex<Supervisor>, command: Command) {
    let mut supervisor = supervisor.lock().await;
    match command {
        Command::PauseLine(ids) => supervisor.pause_lines(&ids).await,
        Command::ResumeLine(ids) => supervisor.resume_lines(&ids).await,
        Command::StopLine(ids) => supervisor.stop_lines(&ids).await,
        Command::RestartLine(ids) => supervisor.restart_lines(&ids).await,
        Command::SetCadence(id, ms) => supervisor.set_cadence(&id, ms).await,
    }
}

/// Subscribes to the command topic on a dedicated MQTT session (distinct
/// from any broker-publisher exporter's session) and routes every decoded
/// command into the Supervisor. Runs until the event loop itself errors out;
/// malformed payloads and unknown commands are logged and do not stop the
/// loop.
pub async fn run_command_intake(settings: MqttSettings, supervisor: Arc<Mutex<Supervisor>>) {
    let mut options = MqttOptions::new(
        format!("{}-cmd", settings.client_id),
        host_from_broker(&settings.broker),
        settings.port,
    );
    options.set_keep_alive(Duration::from_secs(20));
    options.set_clean_session(true);
    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        options.set_credentials(username.clone(), password.clone());
    }

    let (client, mut event_loop) = AsyncClient::new(options, 16);
    let qos = match settings.qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    };
    if let Err(err) = client.subscribe(&settings.command_topic, qos).await {
        error!("command intake: failed to subscribe: {}", err);
        return;
    }
    info!("command intake listening on {}", settings.command_topic);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                match parse_command(&publish.payload) {
                    Ok(command) => dispatch(&supervisor, command).await,
                    Err(err) => warn!("command intake: discarding malformed message: {}", err),
                }
            }
            Ok(_) => {}
            Err(err) => {
                debug!("command intake: transport event error: {}", err);
            }
        }
    }
}

fn host_from_broker(broker: &str) -> String {
    broker
        .trim_start_matches("tcp://")
        .trim_start_matches("mqtt://")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_recognised_command_shape() {
        assert_eq!(
            parse_command(br#"{"command":"pause_line","line_ids":["L1","L2"]}"#).unwrap(),
            Command::PauseLine(vec!["L1".to_string(), "L2".to_string()])
        );
        assert_eq!(
            parse_command(br#"{"command":"set_cadence","line_id":"L1","cadence_ms":50}"#).unwrap(),
            Command::SetCadence("L1".to_string(), 50)
        );
        assert_eq!(
            parse_command(br#"{"command":"restart_line","line_ids":["L1"]}"#).unwrap(),
            Command::RestartLine(vec!["L1".to_string()])
        );
    }

    #[test]
    fn unknown_command_is_an_error_not_a_panic() {
        let err = parse_command(br#"{"command":"nuke_everything"}"#).unwrap_err();
        assert!(matches!(err, CommandError::Unknown(_)));
    }

    #[test]
    fn non_string_command_field_is_an_error_not_a_panic() {
        let err = parse_command(br#"{"command":42}"#).unwrap_err();
        assert!(matches!(err, CommandError::Unknown(_)));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = parse_command(b"not json").unwrap_err();
        assert!(matches!(err, CommandError::Parse(_)));
    }

    #[test]
    fn host_from_broker_strips_scheme() {
        assert_eq!(host_from_broker("tcp://broker.example"), "broker.example");
        assert_eq!(host_from_broker("mqtt://broker.example"), "broker.example");
    }
}
