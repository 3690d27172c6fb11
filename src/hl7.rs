//! Minimal HL7 v2 parsing: just enough to locate MSH, detect ACKs, and
//! build a reply ACK. Not a general-purpose HL7 parser.

use crate::settings::Settings;
use chrono::Local;

const SEGMENT_TERMINATOR: u8 = 0x0D;

/// A read-only view derived from an HL7 message payload.
pub struct MshView<'a> {
    pub field_separator: char,
    pub fields: Vec<&'a str>,
}

impl<'a> MshView<'a> {
    /// Locate the MSH segment (first segment whose first 3 bytes are
    /// `"MSH"`) and split it on its own field separator (MSH-1).
    pub fn parse(payload: &'a [u8]) -> Option<MshView<'a>> {
        let text = std::str::from_utf8(payload).ok()?;
        let msh_segment = text
            .split(SEGMENT_TERMINATOR as char)
            .find(|seg| seg.as_bytes().starts_with(b"MSH"))?;
        let field_separator = msh_segment.as_bytes().get(3).copied()? as char;
        let fields: Vec<&str> = msh_segment.split(field_separator).collect();
        Some(MshView {
            field_separator,
            fields,
        })
    }

    /// MSH-N, 1-indexed the way HL7 numbers fields (MSH-1 is the field
    /// separator itself, MSH-2 is the encoding characters, etc). `fields[0]`
    /// is always the literal `"MSH"`, so `field(n)` indexes `fields[n]`
    /// directly wherever that is within bounds.
    pub fn field(&self, n: usize) -> &'a str {
        self.fields.get(n).copied().unwrap_or("")
    }
}

/// `true` iff `payload`'s MSH-9 (message type) begins with `"ACK"`.
pub fn is_ack(payload: &[u8]) -> bool {
    match MshView::parse(payload) {
        Some(msh) => msh.field(8).starts_with("ACK"),
        None => false,
    }
}

/// The MSH-10 (message control ID), or empty string if MSH is absent or
/// the field is short.
pub fn extract_control_id(payload: &[u8]) -> String {
    match MshView::parse(payload) {
        Some(msh) => msh.field(9).to_owned(),
        None => String::new(),
    }
}

/// Translate the small set of date/time tokens the settings surface
/// supports into a `chrono` strftime pattern. Falls back to the default
/// format on any token this table doesn't recognize.
fn chrono_format_string(format: &str) -> String {
    const DEFAULT: &str = "yyyy-MM-dd HH:mm:ss";
    let known = [
        ("yyyy", "%Y"),
        ("MM", "%m"),
        ("dd", "%d"),
        ("HH", "%H"),
        ("mm", "%M"),
        ("ss", "%S"),
    ];
    let source = if format.is_empty() { DEFAULT } else { format };
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    'outer: while !rest.is_empty() {
        for (token, repl) in known {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(repl);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// Build an HL7 ACK^R01 payload (no MLLP framing) replying to `incoming`.
///
/// Swaps sending/receiving app+facility, echoes the incoming control ID,
/// stamps the current local time per `settings.message_date_time_format`,
/// and emits an `MSA|{ack_mode}|{control_id}` segment. This is the correct
/// builder used by the proxy and the interactive client; see
/// [`build_ack_legacy_listener`] for the listener-only reference behavior
/// this implementation deliberately does *not* reproduce.
pub fn build_ack(incoming: &[u8], settings: &Settings) -> String {
    let msh = MshView::parse(incoming);
    let (field_sep, encoding_chars) = match &msh {
        Some(m) => (m.field_separator, m.field(1)),
        None => ('|', "^~\\&"),
    };
    let encoding_chars = if encoding_chars.is_empty() {
        "^~\\&"
    } else {
        encoding_chars
    };

    // Incoming array indices: [2]=MSH-3 (sending app), [3]=MSH-4 (sending
    // facility), [4]=MSH-5 (receiving app), [5]=MSH-6 (receiving facility).
    // The ACK is sent back from the original receiver to the original
    // sender, so it swaps: outgoing sending = incoming receiving, and
    // outgoing receiving = incoming sending.
    let sending_app = msh
        .as_ref()
        .map(|m| m.field(4))
        .filter(|s| !s.is_empty())
        .unwrap_or(&settings.sending_application);
    let sending_facility = msh
        .as_ref()
        .map(|m| m.field(5))
        .filter(|s| !s.is_empty())
        .unwrap_or(&settings.sending_facility);
    let receiving_app = msh
        .as_ref()
        .map(|m| m.field(2))
        .filter(|s| !s.is_empty())
        .unwrap_or(&settings.receiving_application);
    let receiving_facility = msh
        .as_ref()
        .map(|m| m.field(3))
        .filter(|s| !s.is_empty())
        .unwrap_or(&settings.receiving_facility);

    let control_id = msh.as_ref().map(|m| m.field(9)).unwrap_or("");

    let timestamp = Local::now()
        .format(&chrono_format_string(&settings.message_date_time_format))
        .to_string();

    let msh_reply = format!(
        "MSH{sep}{enc}{sep}{sa}{sep}{sf}{sep}{ra}{sep}{rf}{sep}{ts}{sep}{sep}ACK^R01{sep}{cid}{sep}P{sep}2.3.1",
        sep = field_sep,
        enc = encoding_chars,
        sa = sending_app,
        sf = sending_facility,
        ra = receiving_app,
        rf = receiving_facility,
        ts = timestamp,
        cid = control_id,
    );
    let msa = format!(
        "MSA{sep}{mode}{sep}{cid}",
        sep = field_sep,
        mode = settings.ack_mode,
        cid = control_id
    );
    format!("{msh_reply}\r{msa}\r")
}

/// The listener-only mode's original ACK generator: overwrite MSH-9 of the
/// *incoming* message with the configured ack mode and echo the rest of
/// the segment unchanged. This yields a message with the wrong message
/// type and no MSA segment — a documented bug in the reference
/// implementation, kept here only as a tested record of the behavior this
/// repository's listener deliberately no longer reproduces (it calls
/// [`build_ack`] instead). Not called from any runtime path.
pub fn build_ack_legacy_listener(incoming: &[u8], settings: &Settings) -> String {
    let text = match std::str::from_utf8(incoming) {
        Ok(t) => t,
        Err(_) => return String::new(),
    };
    let mut segments: Vec<String> = text
        .split(SEGMENT_TERMINATOR as char)
        .map(|s| s.to_owned())
        .collect();
    if let Some(msh) = segments
        .iter_mut()
        .find(|seg| seg.as_bytes().starts_with(b"MSH"))
    {
        if let Some(sep) = msh.as_bytes().get(3).copied() {
            let sep = sep as char;
            let mut rebuilt: Vec<String> = msh.split(sep).map(str::to_owned).collect();
            if rebuilt.len() > 8 {
                rebuilt[8] = settings.ack_mode.clone();
                *msh = rebuilt.join(&sep.to_string());
            }
        }
    }
    segments.join("\r")
}
