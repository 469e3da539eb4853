use crate::shared::frame::Frame;

pub type ClassifierError = Box<dyn std::error::Error + Send + Sync>;

/// Domain interface for the face classifier.
///
/// Returns the number of faces found in the frame. Implementations may be
/// stateful, hence `&mut self`; the coordinator calls them from a single
/// worker thread, one frame at a time.
pub trait Classifier: Send {
    fn analyze(&mut self, frame: &Frame) -> Result<usize, ClassifierError>;
}
