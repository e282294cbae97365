#![no_main]

use libfuzzer_sys::fuzz_target;

use udf_gateway::msgpack::{decode, encode, validate};

fuzz_target!(|data: &[u8]| {
    let decoded = decode(data);
    assert_eq!(validate(data), decoded.as_ref().map(|v| v.kind()).map_err(Clone::clone));

    // Anything accepted must re-encode to bytes that decode to the same value.
    if let Ok(value) = decoded {
        let bytes = encode(&value).expect("decoded value re-encodes");
        assert_eq!(decode(&bytes).expect("re-encoded value decodes"), value);
    }
});
