/// Messages accepted by a running collector's control queue. Delivered over
/// an `mpsc` channel and drained in FIFO order before each cycle decision.
#[derive(Debug, Clone, Copy)]
pub enum ControlMessage {
    Pause,
    Resume,
    SetFrequency(u64),
    Stop,
}
