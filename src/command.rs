// ABOUTME: Parses and formats the text commands and replies carried inside frame bodies
// ABOUTME: Grammar: VERB::TOPIC[,DATA] for commands; VERDICT::VERB,TOPIC[,extra...] or DATA::payload for replies

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const FIELD_SEP: &str = "::";
pub const SUBFIELD_SEP: char = ',';

pub const VERB_PUB: &str = "PUB";
pub const VERB_SUB: &str = "SUB";
pub const VERB_USUB: &str = "USUB";

pub const VERDICT_OK: &str = "OK";
pub const VERDICT_ERR: &str = "ERR";

pub const DATA_TAG: &str = "DATA";

/// Errors while parsing a command or reply body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("malformed command body")]
    Malformed,

    #[error("invalid topic {topic:?} in {verb} command")]
    InvalidTopic { verb: String, topic: String },

    #[error("unknown verb {verb:?} (topic {topic:?})")]
    UnknownVerb { verb: String, topic: String },
}

/// A command issued by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pub { topic: String, data: Bytes },
    Sub { topic: String },
    Usub { topic: String },
}

impl Command {
    /// Build the frame body a client would send for this command.
    pub fn to_body(&self) -> Vec<u8> {
        match self {
            Command::Pub { topic, data } => {
                let mut out = BytesMut::with_capacity(VERB_PUB.len() + FIELD_SEP.len() + topic.len() + 1 + data.len());
                out.put_slice(VERB_PUB.as_bytes());
                out.put_slice(FIELD_SEP.as_bytes());
                out.put_slice(topic.as_bytes());
                out.put_u8(SUBFIELD_SEP as u8);
                out.put_slice(data);
                out.to_vec()
            }
            Command::Sub { topic } => format!("{VERB_SUB}{FIELD_SEP}{topic}").into_bytes(),
            Command::Usub { topic } => format!("{VERB_USUB}{FIELD_SEP}{topic}").into_bytes(),
        }
    }
}

/// A reply sent by the broker to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Verdict {
        ok: bool,
        verb: String,
        topic: String,
        extra: Vec<String>,
    },
    Data {
        payload: Bytes,
    },
}

/// Topics are non-empty and restricted to ASCII alphanumerics.
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty() && topic.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Parse a command body received from a client.
pub fn parse(body: &[u8]) -> Result<Command, CommandError> {
    let text = utf8_or_malformed(body)?;
    let (verb, rest) = split_once_seq(text, FIELD_SEP).ok_or(CommandError::Malformed)?;

    match verb {
        VERB_SUB => Ok(Command::Sub {
            topic: ensure_topic(verb, rest)?,
        }),
        VERB_USUB => Ok(Command::Usub {
            topic: ensure_topic(verb, rest)?,
        }),
        VERB_PUB => {
            let (topic, data) = split_once_char(rest, SUBFIELD_SEP).unwrap_or((rest, ""));
            let topic = ensure_topic(verb, topic)?;
            Ok(Command::Pub {
                topic,
                data: Bytes::copy_from_slice(data.as_bytes()),
            })
        }
        other => {
            let topic = rest.split(SUBFIELD_SEP).next().unwrap_or(rest);
            Err(CommandError::UnknownVerb {
                verb: other.to_string(),
                topic: topic.to_string(),
            })
        }
    }
}

/// Parse a reply body received by the embedded client.
pub fn parse_reply(body: &[u8]) -> Result<Reply, CommandError> {
    let text = utf8_or_malformed(body)?;

    if let Some(payload) = text.strip_prefix(&format!("{DATA_TAG}{FIELD_SEP}")) {
        return Ok(Reply::Data {
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        });
    }

    let (verdict, rest) = split_once_seq(text, FIELD_SEP).ok_or(CommandError::Malformed)?;
    let ok = match verdict {
        VERDICT_OK => true,
        VERDICT_ERR => false,
        _ => return Err(CommandError::Malformed),
    };
    let mut fields = rest.split(SUBFIELD_SEP);
    let verb = fields.next().ok_or(CommandError::Malformed)?.to_string();
    let topic = fields.next().ok_or(CommandError::Malformed)?.to_string();
    let extra = fields.map(str::to_string).collect();

    Ok(Reply::Verdict {
        ok,
        verb,
        topic,
        extra,
    })
}

/// Format a verdict reply: `OK::VERB,TOPIC` or `ERR::VERB,TOPIC[,extra...]`.
pub fn format_verdict(ok: bool, verb: &str, topic: &str, extra: &[&str]) -> Bytes {
    let verdict = if ok { VERDICT_OK } else { VERDICT_ERR };
    let mut fields = vec![verb, topic];
    fields.extend_from_slice(extra);
    Bytes::from(format!("{verdict}{FIELD_SEP}{}", fields.join(&SUBFIELD_SEP.to_string())))
}

/// Format a data delivery: `DATA::payload`.
pub fn format_data(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(DATA_TAG.len() + FIELD_SEP.len() + payload.len());
    out.put_slice(DATA_TAG.as_bytes());
    out.put_slice(FIELD_SEP.as_bytes());
    out.put_slice(payload);
    out.freeze()
}

fn utf8_or_malformed(body: &[u8]) -> Result<&str, CommandError> {
    std::str::from_utf8(body).map_err(|_| CommandError::Malformed)
}

fn split_once_seq<'a>(text: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    text.split_once(sep)
}

fn split_once_char(text: &str, sep: char) -> Option<(&str, &str)> {
    text.split_once(sep)
}

fn ensure_topic(verb: &str, topic: &str) -> Result<String, CommandError> {
    if is_valid_topic(topic) {
        Ok(topic.to_string())
    } else {
        Err(CommandError::InvalidTopic {
            verb: verb.to_string(),
            topic: topic.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sub() {
        assert_eq!(
            parse(b"SUB::weather").unwrap(),
            Command::Sub {
                topic: "weather".to_string()
            }
        );
    }

    #[test]
    fn parses_usub() {
        assert_eq!(
            parse(b"USUB::weather").unwrap(),
            Command::Usub {
                topic: "weather".to_string()
            }
        );
    }

    #[test]
    fn parses_pub_with_data() {
        assert_eq!(
            parse(b"PUB::weather,sunny").unwrap(),
            Command::Pub {
                topic: "weather".to_string(),
                data: Bytes::from_static(b"sunny")
            }
        );
    }

    #[test]
    fn parses_pub_without_data() {
        assert_eq!(
            parse(b"PUB::weather").unwrap(),
            Command::Pub {
                topic: "weather".to_string(),
                data: Bytes::new(),
            }
        );
    }

    #[test]
    fn rejects_invalid_topic() {
        let err = parse(b"SUB::bad topic!").unwrap_err();
        assert!(matches!(err, CommandError::InvalidTopic { .. }));
    }

    #[test]
    fn rejects_unknown_verb() {
        let err = parse(b"NOPE::weather").unwrap_err();
        assert!(matches!(err, CommandError::UnknownVerb { .. }));
    }

    #[test]
    fn rejects_malformed_body() {
        assert_eq!(parse(b"garbage").unwrap_err(), CommandError::Malformed);
    }

    #[test]
    fn formats_and_parses_verdict_roundtrip() {
        let body = format_verdict(true, VERB_SUB, "weather", &[]);
        let reply = parse_reply(&body).unwrap();
        assert_eq!(
            reply,
            Reply::Verdict {
                ok: true,
                verb: VERB_SUB.to_string(),
                topic: "weather".to_string(),
                extra: vec![],
            }
        );
    }

    #[test]
    fn formats_and_parses_data_roundtrip() {
        let body = format_data(b"sunny");
        let reply = parse_reply(&body).unwrap();
        assert_eq!(
            reply,
            Reply::Data {
                payload: Bytes::from_static(b"sunny")
            }
        );
    }

    #[test]
    fn command_to_body_roundtrips_through_parse() {
        let cmd = Command::Pub {
            topic: "weather".to_string(),
            data: Bytes::from_static(b"sunny"),
        };
        assert_eq!(parse(&cmd.to_body()).unwrap(), cmd);
    }
}
