fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use serde::Deserialize;
    use serde::de::DeserializeOwned;

    use wsline_protocol::frame;
    use wsline_protocol::handshake::{self, HandshakeError};
    use wsline_protocol::{MessageKind, OpCode};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads and deserializes a fixture JSON file.
    fn load_fixture<T: DeserializeOwned>(name: &str) -> T {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    fn unhex(name: &str, s: &str) -> Vec<u8> {
        hex::decode(s).unwrap_or_else(|e| panic!("bad hex in {name}: {e}"))
    }

    #[derive(Deserialize)]
    struct FrameFixture {
        name: String,
        hex: String,
        fin: bool,
        opcode: u8,
        masked: bool,
        payload_hex: String,
    }

    #[derive(Deserialize)]
    struct LengthFixture {
        payload_len: usize,
        header_hex: String,
    }

    #[derive(Deserialize)]
    struct HandshakeFixtures {
        accept_keys: Vec<AcceptKey>,
        requests: Vec<RequestFixture>,
    }

    #[derive(Deserialize)]
    struct AcceptKey {
        key: String,
        accept: String,
    }

    #[derive(Deserialize)]
    struct RequestFixture {
        name: String,
        request: String,
        error: Option<String>,
        response: Option<String>,
    }

    fn error_kind(e: &HandshakeError) -> &'static str {
        match e {
            HandshakeError::MalformedRequest(_) => "malformed_request",
            HandshakeError::Incomplete => "incomplete",
            HandshakeError::RequestTooLarge => "request_too_large",
            HandshakeError::MethodNotAllowed => "method_not_allowed",
            HandshakeError::UnsupportedHttpVersion => "unsupported_http_version",
            HandshakeError::MissingUpgrade => "missing_upgrade",
            HandshakeError::MissingKey => "missing_key",
            HandshakeError::MalformedKey => "malformed_key",
            HandshakeError::UnsupportedVersion => "unsupported_version",
        }
    }

    // --- Frame codec ---

    #[test]
    fn fixture_frames_decode() {
        let fixtures: Vec<FrameFixture> = load_fixture("frames.json");
        assert!(!fixtures.is_empty());

        for f in fixtures {
            let bytes = unhex(&f.name, &f.hex);
            let decoded = frame::decode(&bytes)
                .unwrap_or_else(|e| panic!("failed to decode {}: {e}", f.name));

            assert_eq!(decoded.fin, f.fin, "fin mismatch for {}", f.name);
            assert_eq!(decoded.opcode.as_u8(), f.opcode, "opcode mismatch for {}", f.name);
            assert_eq!(decoded.masked, f.masked, "mask bit mismatch for {}", f.name);
            assert_eq!(
                decoded.payload,
                unhex(&f.name, &f.payload_hex),
                "payload mismatch for {}",
                f.name
            );
        }
    }

    #[test]
    fn fixture_unmasked_frames_encode_identically() {
        let fixtures: Vec<FrameFixture> = load_fixture("frames.json");

        for f in fixtures.iter().filter(|f| f.fin && !f.masked) {
            let opcode = OpCode::from_nibble(f.opcode)
                .unwrap_or_else(|| panic!("fixture {} has invalid opcode", f.name));
            let encoded = frame::encode_frame(opcode, &unhex(&f.name, &f.payload_hex));
            assert_eq!(hex::encode(encoded), f.hex, "encoding mismatch for {}", f.name);
        }
    }

    #[test]
    fn fixture_length_headers() {
        let fixtures: Vec<LengthFixture> = load_fixture("length_headers.json");

        for f in fixtures {
            let encoded = frame::encode(&vec![0xAB; f.payload_len], MessageKind::Binary);
            let header = unhex("length_headers", &f.header_hex);
            assert_eq!(
                hex::encode(&encoded[..header.len()]),
                f.header_hex,
                "header mismatch for length {}",
                f.payload_len
            );
            assert_eq!(encoded.len(), header.len() + f.payload_len);

            let parsed = frame::parse_header(&header).unwrap();
            assert_eq!(parsed.payload_len, f.payload_len as u64);
            assert_eq!(parsed.header_len, header.len());
        }
    }

    // --- Opening handshake ---

    #[test]
    fn fixture_accept_keys() {
        let fixtures: HandshakeFixtures = load_fixture("handshake.json");

        for k in fixtures.accept_keys {
            assert_eq!(handshake::accept_key(&k.key), k.accept, "key {}", k.key);
        }
    }

    #[test]
    fn fixture_handshake_requests() {
        let fixtures: HandshakeFixtures = load_fixture("handshake.json");

        for r in fixtures.requests {
            let result = handshake::perform_handshake(r.request.as_bytes());
            match (&r.error, &r.response, result) {
                (None, Some(expected), Ok(response)) => {
                    assert_eq!(
                        String::from_utf8(response).unwrap(),
                        *expected,
                        "response mismatch for {}",
                        r.name
                    );
                }
                (Some(expected), None, Err(e)) => {
                    assert_eq!(
                        error_kind(&e),
                        expected.as_str(),
                        "error mismatch for {}",
                        r.name
                    );
                }
                (_, _, result) => panic!("unexpected outcome for {}: {result:?}", r.name),
            }
        }
    }
}
