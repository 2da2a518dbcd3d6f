// src/util/slugid.rs

use uuid::Uuid;

const BASE64URL: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generate a 22-character URL-safe slug from a fresh v4 UUID, the id form
/// the execution platform assigns to tasks.
pub fn slugid() -> String {
    encode(Uuid::new_v4().as_bytes())
}

fn encode(bytes: &[u8; 16]) -> String {
    let mut out = String::with_capacity(22);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;

        out.push(BASE64URL[(triple >> 18) as usize & 0x3f] as char);
        out.push(BASE64URL[(triple >> 12) as usize & 0x3f] as char);
        if chunk.len() > 1 {
            out.push(BASE64URL[(triple >> 6) as usize & 0x3f] as char);
        }
        if chunk.len() > 2 {
            out.push(BASE64URL[triple as usize & 0x3f] as char);
        }
    }
    out
}
