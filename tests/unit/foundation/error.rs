use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        TesseraError::storage("x")
            .to_string()
            .contains("storage error:")
    );
    assert!(TesseraError::decode("x").to_string().contains("decode error:"));
    assert!(TesseraError::cache("x").to_string().contains("cache error:"));
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = TesseraError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
