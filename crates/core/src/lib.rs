pub mod capture {
    pub mod domain {
        pub mod capture_device;
        pub mod capture_session;
        pub mod capture_state;
        pub mod notification_sink;
        pub mod state_observers;
    }
    pub mod infrastructure;
}

pub mod detection {
    pub mod domain {
        pub mod classifier;
        pub mod detection_result;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod capture_consumer;
    pub mod detection_coordinator;
    pub mod diagnostics;
    pub mod face_capture_use_case;
    pub mod latest_frame_slot;
}

pub mod shared {
    pub mod constants;
    pub mod frame;
}

pub mod video {
    pub mod domain {
        pub mod frame_source;
        pub mod image_writer;
        pub mod still_source;
    }
    pub mod infrastructure;
}
