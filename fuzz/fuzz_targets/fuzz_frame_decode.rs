#![no_main]

use std::sync::OnceLock;

use bulwark_core::{read_frame, read_frame_bytes, ProtocolError, Request};
use libfuzzer_sys::fuzz_target;
use tokio::runtime::Runtime;

const LIMIT: usize = 4096;

fn runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
    })
}

fuzz_target!(|data: &[u8]| {
    runtime().block_on(async {
        let mut reader = data;
        match read_frame_bytes(&mut reader, LIMIT).await {
            Ok(frame) => {
                assert!(frame.len() <= LIMIT);
                assert!(!frame.contains(&b'\n'));
            }
            Err(ProtocolError::FrameTooLarge { limit }) => {
                assert_eq!(limit, LIMIT);
                assert!(data.len() > LIMIT);
            }
            Err(_) => {}
        }

        // Full decode never panics, whatever the bytes
        let mut reader = data;
        let _ = read_frame::<_, Request>(&mut reader, LIMIT).await;
    });
});
