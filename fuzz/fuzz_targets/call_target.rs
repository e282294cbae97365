#![no_main]

use libfuzzer_sys::fuzz_target;

use udf_gateway::CallTarget;

fuzz_target!(|data: &str| {
    // A valid target must never let its probe script escape the bracket accesses.
    if let Ok(target) = CallTarget::parse(data) {
        let expr = target.js_expression();
        assert!(expr.starts_with("globalThis?.[\""));
        assert_eq!(expr.matches("?.[").count(), target.segments().count());
    }
});
