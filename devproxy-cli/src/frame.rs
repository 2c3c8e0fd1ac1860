//! `devproxy decode|encode|inspect`: offline frame tools.

use std::fmt::Write as _;
use std::io::Write as _;

use anyhow::{Context, Result, bail};
use devproxy::{CodecKind, Message};
use devproxy_proto::{MessageType, frame};

/// Prints the envelope in `bytes` as pretty JSON.
pub fn decode(codec: CodecKind, bytes: &[u8]) -> Result<()> {
    let msg = parse(codec, bytes)?;
    println!("{}", render_json(&msg)?);
    Ok(())
}

/// Re-encodes the JSON envelope in `bytes` as a `codec` frame on stdout.
pub fn encode(codec: CodecKind, hex: bool, bytes: &[u8]) -> Result<()> {
    let msg = Message::from_slice(CodecKind::Json, bytes.trim_ascii())
        .context("input is not a JSON envelope")?;
    let payload = msg.to_vec(codec)?;
    let mut out = frame::header(payload.len())?.to_vec();
    out.extend_from_slice(&payload);

    if hex {
        println!("{}", to_hex(&out));
        return Ok(());
    }
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&out)?;
    stdout.flush()?;
    Ok(())
}

/// Prints the routing header of the envelope in `bytes`.
pub fn inspect(codec: CodecKind, bytes: &[u8]) -> Result<()> {
    let payload = unframe(bytes);
    let msg = Message::from_slice(codec, payload).context("failed to decode envelope")?;
    print!("{}", summary(&msg, payload.len()));
    Ok(())
}

/// Decodes one envelope, framed or bare.
fn parse(codec: CodecKind, bytes: &[u8]) -> Result<Message> {
    let payload = match codec {
        CodecKind::Json => bytes.trim_ascii(),
        _ => unframe(bytes),
    };
    Message::from_slice(codec, payload).context("failed to decode envelope")
}

/// Strips the length prefix if `bytes` is exactly one frame.
fn unframe(bytes: &[u8]) -> &[u8] {
    match bytes.split_first_chunk::<4>() {
        Some((len, rest)) if u32::from_be_bytes(*len) as usize == rest.len() => rest,
        _ => bytes,
    }
}

/// Renders `msg` in the JSON wire format, indented.
fn render_json(msg: &Message) -> Result<String> {
    if msg.content.is_none() {
        bail!(
            "message type {} is not a known payload; try `devproxy inspect`",
            msg.type_id
        );
    }
    let value: serde_json::Value = serde_json::from_slice(&msg.to_vec(CodecKind::Json)?)?;
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Formats the header fields of `msg`, one per line.
fn summary(msg: &Message, size: usize) -> String {
    let kind = MessageType::from_u32(msg.type_id).map_or("unknown", MessageType::name);
    let direction = if msg.is_response { "response" } else { "request" };
    let payload = msg.content.as_ref().map_or("undecoded", |c| c.name());

    let mut out = String::new();
    let _ = writeln!(out, "version  {}", version_string(msg.version));
    let _ = writeln!(out, "type     {kind} ({}) {direction}", msg.type_id);
    let _ = writeln!(out, "payload  {payload}");
    let _ = writeln!(out, "seq      {}", msg.sequence_id);
    let _ = writeln!(out, "error    {}", msg.error);
    let _ = writeln!(out, "source   {}", msg.source);
    let _ = writeln!(out, "proxy    {}", msg.proxy);
    let _ = writeln!(out, "target   {}", msg.target);
    let _ = writeln!(out, "size     {size} bytes");
    out
}

/// Formats a packed protocol version as `major.minor.patch`.
fn version_string(v: u32) -> String {
    format!("{}.{}.{}", v >> 24, (v >> 16) & 0xff, v & 0xffff)
}

/// Lowercase hex without separators.
fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
