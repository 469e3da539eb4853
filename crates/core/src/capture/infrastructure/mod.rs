pub mod file_capture_device;
pub mod log_notification_sink;
