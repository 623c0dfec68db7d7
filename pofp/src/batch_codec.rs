//! Framing for a `BatchedLooseObjects` response body: a simple
//! length-prefixed stream of `(sha, body)` records, repeated until EOF.
//! spec.md does not mandate a specific batched wire format, so this is
//! an implementation decision this repo is free to make (see
//! SPEC_FULL.md's C6 implementation note).

use std::io::{self, Read};

/// Read one `(sha_hex, body)` record, or `None` at a clean EOF before
/// any bytes of the next record header are read.
pub fn read_record(mut r: impl Read) -> io::Result<Option<(String, Vec<u8>)>> {
    let mut len_buf = [0u8; 4];
    match read_exact_or_eof(&mut r, &mut len_buf)? {
        false => return Ok(None),
        true => {}
    }
    let sha_len = u32::from_be_bytes(len_buf) as usize;
    let mut sha_buf = vec![0u8; sha_len];
    r.read_exact(&mut sha_buf)?;
    let sha_hex = String::from_utf8(sha_buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut body_len_buf = [0u8; 8];
    r.read_exact(&mut body_len_buf)?;
    let body_len = u64::from_be_bytes(body_len_buf) as usize;
    let mut body = vec![0u8; body_len];
    r.read_exact(&mut body)?;

    Ok(Some((sha_hex, body)))
}

/// Like `Read::read_exact` but returns `Ok(false)` instead of erroring
/// when zero bytes are available at the very start of the read.
fn read_exact_or_eof(mut r: impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated batched-loose-objects record header",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

pub fn write_record(mut w: impl io::Write, sha_hex: &str, body: &[u8]) -> io::Result<()> {
    w.write_all(&(sha_hex.len() as u32).to_be_bytes())?;
    w.write_all(sha_hex.as_bytes())?;
    w.write_all(&(body.len() as u64).to_be_bytes())?;
    w.write_all(body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_multiple_records() {
        let mut buf = Vec::new();
        write_record(&mut buf, "aaaa", b"one").unwrap();
        write_record(&mut buf, "bbbb", b"two").unwrap();

        let mut cursor = Cursor::new(buf);
        let (sha, body) = read_record(&mut cursor).unwrap().unwrap();
        assert_eq!(sha, "aaaa");
        assert_eq!(body, b"one");
        let (sha, body) = read_record(&mut cursor).unwrap().unwrap();
        assert_eq!(sha, "bbbb");
        assert_eq!(body, b"two");
        assert!(read_record(&mut cursor).unwrap().is_none());
    }
}
