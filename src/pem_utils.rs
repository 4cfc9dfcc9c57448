use crate::error::{CertDepotError, Result};

pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";
pub const CERTIFICATE_REQUEST_LABEL: &str = "CERTIFICATE REQUEST";
pub const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

/// Convert DER‑encoded data into a PEM‑encoded string with the provided label.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let pem = pem::Pem::new(label, der);
    pem::encode_config(&pem, pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF))
}

/// Splits a blob holding one or more PEM objects, keeping their order.
pub fn split_blocks(text: &str) -> Result<Vec<pem::Pem>> {
    Ok(pem::parse_many(text)?)
}

/// Returns the first PEM block carrying `label`.
pub fn find_block(text: &str, label: &str) -> Result<pem::Pem> {
    split_blocks(text)?
        .into_iter()
        .find(|block| block.tag() == label)
        .ok_or_else(|| CertDepotError::Decoding(format!("no {label} block found")))
}

/// Concatenates PEM texts into one blob, one object after another.
pub fn concat(texts: &[&str]) -> String {
    let mut blob = String::new();
    for text in texts {
        blob.push_str(text);
        if !text.ends_with('\n') {
            blob.push('\n');
        }
    }
    blob
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_keeps_order() {
        let cert = der_to_pem(&[1, 2, 3], CERTIFICATE_LABEL);
        let key = der_to_pem(&[4, 5, 6], PRIVATE_KEY_LABEL);
        let blob = concat(&[cert.as_str(), key.as_str()]);

        let blocks = split_blocks(&blob).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].tag(), CERTIFICATE_LABEL);
        assert_eq!(blocks[1].contents(), &[4, 5, 6]);
        assert_eq!(find_block(&blob, PRIVATE_KEY_LABEL).unwrap().contents(), &[4, 5, 6]);
        assert!(find_block(&blob, CERTIFICATE_REQUEST_LABEL).is_err());
    }
}
