//! Script dialogue messages and the replies each one accepts.

use crate::network::{OutPacket, PacketWriter, SendOp};

/// NPC speaker marker in the script message header.
const SPEAKER_NPC: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Say,
    AskYesNo,
    AskText,
    AskNumber,
    AskMenu,
}

impl MessageKind {
    fn code(self) -> u8 {
        match self {
            MessageKind::Say => 0,
            MessageKind::AskYesNo => 1,
            MessageKind::AskText => 2,
            MessageKind::AskNumber => 3,
            MessageKind::AskMenu => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptMessage {
    Say { speaker: u32, text: String, prev: bool, next: bool },
    AskYesNo { speaker: u32, text: String },
    AskText { speaker: u32, text: String, default: String, min_len: u16, max_len: u16 },
    AskNumber { speaker: u32, text: String, default: i32, min: i32, max: i32 },
    AskMenu { speaker: u32, text: String, options: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogAction {
    Prev,
    Next,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    Dialog(DialogAction),
    YesNo(bool),
    Text(String),
    Number(i32),
    Selection(i32),
}

impl ScriptMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ScriptMessage::Say { .. } => MessageKind::Say,
            ScriptMessage::AskYesNo { .. } => MessageKind::AskYesNo,
            ScriptMessage::AskText { .. } => MessageKind::AskText,
            ScriptMessage::AskNumber { .. } => MessageKind::AskNumber,
            ScriptMessage::AskMenu { .. } => MessageKind::AskMenu,
        }
    }

    fn speaker(&self) -> u32 {
        match self {
            ScriptMessage::Say { speaker, .. }
            | ScriptMessage::AskYesNo { speaker, .. }
            | ScriptMessage::AskText { speaker, .. }
            | ScriptMessage::AskNumber { speaker, .. }
            | ScriptMessage::AskMenu { speaker, .. } => *speaker,
        }
    }

    /// Whether `reply` is an acceptable answer to this message.
    pub fn validate(&self, reply: &ScriptReply) -> bool {
        match (self, reply) {
            (ScriptMessage::Say { prev, .. }, ScriptReply::Dialog(DialogAction::Prev)) => *prev,
            (ScriptMessage::Say { next, .. }, ScriptReply::Dialog(DialogAction::Next)) => *next,
            (ScriptMessage::AskYesNo { .. }, ScriptReply::YesNo(_)) => true,
            (ScriptMessage::AskText { min_len, max_len, .. }, ScriptReply::Text(text)) => {
                let len = text.chars().count();
                len >= *min_len as usize && len <= *max_len as usize
            }
            (ScriptMessage::AskNumber { min, max, .. }, ScriptReply::Number(n)) => n >= min && n <= max,
            (ScriptMessage::AskMenu { options, .. }, ScriptReply::Selection(i)) => {
                *i >= 0 && (*i as usize) < options.len()
            }
            _ => false,
        }
    }

    pub fn encode(&self) -> OutPacket {
        let w = PacketWriter::new(SendOp::ScriptMessage)
            .u8(SPEAKER_NPC)
            .u32(self.speaker())
            .u8(self.kind().code());
        let w = match self {
            ScriptMessage::Say { text, prev, next, .. } => w.str(text).bool(*prev).bool(*next),
            ScriptMessage::AskYesNo { text, .. } => w.str(text),
            ScriptMessage::AskText { text, default, min_len, max_len, .. } => w
                .str(text)
                .str(default)
                .i16(*min_len as i16)
                .i16(*max_len as i16),
            ScriptMessage::AskNumber { text, default, min, max, .. } => {
                w.str(text).i32(*default).i32(*min).i32(*max)
            }
            ScriptMessage::AskMenu { text, options, .. } => {
                let mut body = text.clone();
                for (i, option) in options.iter().enumerate() {
                    body.push_str(&format!("\r\n#L{i}#{option}#l"));
                }
                w.str(&body)
            }
        };
        w.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_say_accepts_only_enabled_buttons() {
        let first_page = ScriptMessage::Say { speaker: 1, text: "Hi".into(), prev: false, next: true };
        assert!(first_page.validate(&ScriptReply::Dialog(DialogAction::Next)));
        assert!(!first_page.validate(&ScriptReply::Dialog(DialogAction::Prev)));
        assert!(!first_page.validate(&ScriptReply::YesNo(true)));
    }

    #[test]
    fn test_ask_number_bounds() {
        let msg = ScriptMessage::AskNumber { speaker: 1, text: "How many?".into(), default: 1, min: 1, max: 100 };
        assert!(msg.validate(&ScriptReply::Number(1)));
        assert!(msg.validate(&ScriptReply::Number(100)));
        assert!(!msg.validate(&ScriptReply::Number(0)));
        assert!(!msg.validate(&ScriptReply::Number(101)));
    }

    #[test]
    fn test_ask_text_counts_chars() {
        let msg = ScriptMessage::AskText {
            speaker: 1,
            text: "Name?".into(),
            default: String::new(),
            min_len: 2,
            max_len: 4,
        };
        assert!(msg.validate(&ScriptReply::Text("äöü".into())));
        assert!(!msg.validate(&ScriptReply::Text("a".into())));
        assert!(!msg.validate(&ScriptReply::Text("abcde".into())));
    }

    #[test]
    fn test_ask_menu_selection_range() {
        let msg = ScriptMessage::AskMenu {
            speaker: 1,
            text: "Pick".into(),
            options: vec!["Henesys".into(), "Ellinia".into()],
        };
        assert!(msg.validate(&ScriptReply::Selection(1)));
        assert!(!msg.validate(&ScriptReply::Selection(2)));
        assert!(!msg.validate(&ScriptReply::Selection(-1)));
    }

    #[test]
    fn test_encode_header() {
        let p = ScriptMessage::AskYesNo { speaker: 9000000, text: "Ready?".into() }.encode();
        assert_eq!(p.op, SendOp::ScriptMessage);
        assert_eq!(p.payload[0], SPEAKER_NPC);
        assert_eq!(&p.payload[1..5], &9000000u32.to_le_bytes());
        assert_eq!(p.payload[5], 1);
    }
}
