pub mod scripted_classifier;
