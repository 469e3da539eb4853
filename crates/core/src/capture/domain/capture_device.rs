use super::capture_state::CaptureOutcome;

/// Called exactly once with the result of a capture, from whichever thread
/// the device finishes on.
pub type CaptureCompletion = Box<dyn FnOnce(CaptureOutcome) + Send>;

/// Domain interface for the still-capture device.
///
/// `capture` must not block on the capture itself; implementations report
/// the outcome through `completion`, which they must call on every path.
pub trait CaptureDevice: Send {
    fn capture(&mut self, completion: CaptureCompletion);
}
