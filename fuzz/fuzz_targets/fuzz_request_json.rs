#![no_main]

use bulwark_core::{CommandResponse, Request};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Anything the daemon accepts must survive re-encoding unchanged
    if let Ok(request) = serde_json::from_slice::<Request>(data) {
        let encoded = serde_json::to_vec(&request).unwrap();
        assert!(!encoded.contains(&b'\n'));
        let decoded: Request = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.request_id(), request.request_id());
        assert_eq!(decoded.kind(), request.kind());
    }

    if let Ok(response) = serde_json::from_slice::<CommandResponse>(data) {
        assert_eq!(response.is_success(), response.data().is_some());
        assert_eq!(response.is_success(), response.error().is_none());
    }
});
