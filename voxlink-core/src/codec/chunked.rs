//! HTTP/1.1 chunked transfer framing (emit only).

use std::io::{self, Write};

/// Marks the end of a chunked body.
pub const TERMINAL_CHUNK: &[u8] = b"0\r\n\r\n";

/// Frame `payload` as `<lower-hex len>\r\n<payload>\r\n`.
pub fn encode_chunk(payload: &[u8]) -> Vec<u8> {
    let header = format!("{:x}\r\n", payload.len());
    let mut out = Vec::with_capacity(header.len() + payload.len() + 2);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\r\n");
    out
}

/// Write one framed chunk straight to `w` without an intermediate copy.
pub fn write_chunk<W: Write + ?Sized>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    write!(w, "{:x}\r\n", payload.len())?;
    w.write_all(payload)?;
    w.write_all(b"\r\n")
}

pub fn write_terminal<W: Write + ?Sized>(w: &mut W) -> io::Result<()> {
    w.write_all(TERMINAL_CHUNK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_lowercase_hex_length() {
        assert_eq!(encode_chunk(b"hello"), b"5\r\nhello\r\n");
        let payload = vec![0u8; 4096];
        let framed = encode_chunk(&payload);
        assert!(framed.starts_with(b"1000\r\n"));
        assert!(framed.ends_with(b"\r\n"));
        assert_eq!(framed.len(), 6 + 4096 + 2);

        let odd = vec![1u8; 0xabc];
        assert!(encode_chunk(&odd).starts_with(b"abc\r\n"));
    }

    #[test]
    fn streaming_writer_matches_buffered_encoder() {
        let mut wire = Vec::new();
        write_chunk(&mut wire, b"abc").unwrap();
        write_chunk(&mut wire, &[0xFF; 17]).unwrap();
        write_terminal(&mut wire).unwrap();

        let mut expected = encode_chunk(b"abc");
        expected.extend(encode_chunk(&[0xFF; 17]));
        expected.extend_from_slice(b"0\r\n\r\n");
        assert_eq!(wire, expected);
    }
}
