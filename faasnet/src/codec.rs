//! Protocol messages and their `;`-delimited text encoding.
//!
//! Every message is an ASCII tag followed by its fields, each terminated by
//! `;`:
//!
//! | Tag | Fields                        | Meaning                    |
//! |-----|-------------------------------|----------------------------|
//! | `e` | module; func; arg1; arg2      | execute request            |
//! | `r` | module; result                | execute result             |
//! | `l` | module                        | bytecode load request      |
//! | `c` | module; base64 bytecode       | bytecode load response     |
//! | `n` | module                        | not found                  |
//!
//! Names can never contain `;`, so the encoding is injective.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::types::{FunctionName, ModuleName, NameError};
use crate::wire::{self, WireError};

/// Why a datagram could not be turned into a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Frame header or checksum is invalid.
    #[error("bad frame: {0}")]
    Frame(#[from] WireError),
    /// Payload is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    /// Payload does not end with `;`.
    #[error("payload is missing the trailing ';'")]
    MissingTerminator,
    /// First field is not one of `e r l c n`.
    #[error("unknown message tag {0:?}")]
    UnknownTag(String),
    /// A field the tag requires is absent.
    #[error("message '{tag}' is missing field {field}")]
    MissingField {
        /// Message tag.
        tag: char,
        /// Name of the absent field.
        field: &'static str,
    },
    /// More fields than the tag allows.
    #[error("message '{tag}' has unexpected trailing field {value:?}")]
    UnexpectedField {
        /// Message tag.
        tag: char,
        /// First surplus field.
        value: String,
    },
    /// A field is present but unparsable.
    #[error("message '{tag}' field {field} is invalid: {reason}")]
    InvalidField {
        /// Message tag.
        tag: char,
        /// Name of the field.
        field: &'static str,
        /// Parser diagnostic.
        reason: String,
    },
}

/// An execute request: run `function(arg1, arg2)` from `module`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecuteRequest {
    /// Module holding the function.
    pub module: ModuleName,
    /// Function to call.
    pub function: FunctionName,
    /// First i32 argument.
    pub arg1: i32,
    /// Second i32 argument.
    pub arg2: i32,
}

impl ExecuteRequest {
    /// Build a request from raw names.
    ///
    /// # Errors
    ///
    /// Returns a [`NameError`] if either name is invalid.
    pub fn new(module: &str, function: &str, arg1: i32, arg2: i32) -> Result<Self, NameError> {
        Ok(Self {
            module: ModuleName::new(module)?,
            function: FunctionName::new(function)?,
            arg1,
            arg2,
        })
    }
}

impl std::fmt::Display for ExecuteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}::{}({}, {})",
            self.module, self.function, self.arg1, self.arg2
        )
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `e`: execute request, also used as an availability query.
    Execute(ExecuteRequest),
    /// `r`: result of an execute request.
    ExecuteResult {
        /// Module that produced the result.
        module: ModuleName,
        /// Function return value.
        result: i32,
    },
    /// `l`: ask for a module's bytecode.
    LoadRequest {
        /// Requested module.
        module: ModuleName,
    },
    /// `c`: a module's bytecode.
    LoadResponse {
        /// Module the bytecode belongs to.
        module: ModuleName,
        /// Raw bytecode, base64 on the wire.
        bytes: Vec<u8>,
    },
    /// `n`: the module could not be found or run.
    NotFound {
        /// Module that was not found.
        module: ModuleName,
    },
}

impl Message {
    /// Wire tag of this message.
    pub fn tag(&self) -> char {
        match self {
            Message::Execute(_) => 'e',
            Message::ExecuteResult { .. } => 'r',
            Message::LoadRequest { .. } => 'l',
            Message::LoadResponse { .. } => 'c',
            Message::NotFound { .. } => 'n',
        }
    }

    /// Module this message is about.
    pub fn module(&self) -> &ModuleName {
        match self {
            Message::Execute(request) => &request.module,
            Message::ExecuteResult { module, .. }
            | Message::LoadRequest { module }
            | Message::LoadResponse { module, .. }
            | Message::NotFound { module } => module,
        }
    }

    /// Encode to the `;`-delimited text form.
    pub fn encode(&self) -> Vec<u8> {
        let text = match self {
            Message::Execute(request) => format!(
                "e;{};{};{};{};",
                request.module, request.function, request.arg1, request.arg2
            ),
            Message::ExecuteResult { module, result } => format!("r;{module};{result};"),
            Message::LoadRequest { module } => format!("l;{module};"),
            Message::LoadResponse { module, bytes } => {
                format!("c;{module};{};", STANDARD.encode(bytes))
            }
            Message::NotFound { module } => format!("n;{module};"),
        };
        text.into_bytes()
    }

    /// Decode from the `;`-delimited text form.
    ///
    /// # Errors
    ///
    /// Any deviation from the grammar above is a [`CodecError`].
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(payload).map_err(|_| CodecError::NotUtf8)?;
        let body = text
            .strip_suffix(';')
            .ok_or(CodecError::MissingTerminator)?;

        let mut parts = body.split(';');
        let tag = match parts.next() {
            Some("e") => 'e',
            Some("r") => 'r',
            Some("l") => 'l',
            Some("c") => 'c',
            Some("n") => 'n',
            other => return Err(CodecError::UnknownTag(other.unwrap_or_default().to_string())),
        };
        let mut fields = Fields { tag, parts };

        let message = match tag {
            'e' => Message::Execute(ExecuteRequest {
                module: fields.module()?,
                function: fields.parse("function", FunctionName::new)?,
                arg1: fields.parse("arg1", str::parse::<i32>)?,
                arg2: fields.parse("arg2", str::parse::<i32>)?,
            }),
            'r' => Message::ExecuteResult {
                module: fields.module()?,
                result: fields.parse("result", str::parse::<i32>)?,
            },
            'l' => Message::LoadRequest {
                module: fields.module()?,
            },
            'c' => Message::LoadResponse {
                module: fields.module()?,
                bytes: fields.parse("bytes", |s| STANDARD.decode(s))?,
            },
            _ => Message::NotFound {
                module: fields.module()?,
            },
        };

        fields.finish()?;
        Ok(message)
    }

    /// Length of the frame [`Message::to_frame`] would produce.
    pub fn frame_len(&self) -> usize {
        let payload = match self {
            Message::LoadResponse { module, bytes } => base64::encoded_len(bytes.len(), true)
                .and_then(|encoded| encoded.checked_add(module.as_str().len() + 4))
                .unwrap_or(usize::MAX),
            other => other.encode().len(),
        };
        payload.saturating_add(wire::HEADER_SIZE)
    }

    /// Whether the message can travel in a single datagram.
    pub fn fits_in_frame(&self) -> bool {
        self.frame_len() <= wire::MAX_FRAME_SIZE
    }

    /// Encode and wrap in a frame carrying `sequence`.
    ///
    /// # Errors
    ///
    /// Fails only if the frame exceeds the datagram limit.
    pub fn to_frame(&self, sequence: u64) -> Result<Vec<u8>, CodecError> {
        Ok(wire::serialize_frame(sequence, &self.encode())?)
    }

    /// Validate a frame and decode its message.
    ///
    /// # Errors
    ///
    /// Corrupted, truncated or ill-formed frames are rejected.
    pub fn from_frame(frame: &[u8]) -> Result<(u64, Self), CodecError> {
        let (sequence, payload) = wire::deserialize_frame(frame)?;
        Ok((sequence, Self::decode(payload)?))
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // bytecode can be large; keep log lines short
            Message::LoadResponse { module, bytes } => {
                write!(f, "c;{module};<{} bytes>;", bytes.len())
            }
            other => f.write_str(&String::from_utf8_lossy(&other.encode())),
        }
    }
}

struct Fields<'a> {
    tag: char,
    parts: std::str::Split<'a, char>,
}

impl<'a> Fields<'a> {
    fn next(&mut self, field: &'static str) -> Result<&'a str, CodecError> {
        self.parts.next().ok_or(CodecError::MissingField {
            tag: self.tag,
            field,
        })
    }

    fn parse<T, E, F>(&mut self, field: &'static str, parse: F) -> Result<T, CodecError>
    where
        F: FnOnce(&'a str) -> Result<T, E>,
        E: std::fmt::Display,
    {
        let raw = self.next(field)?;
        parse(raw).map_err(|err| CodecError::InvalidField {
            tag: self.tag,
            field,
            reason: err.to_string(),
        })
    }

    fn module(&mut self) -> Result<ModuleName, CodecError> {
        self.parse("module", ModuleName::new)
    }

    fn finish(mut self) -> Result<(), CodecError> {
        match self.parts.next() {
            None => Ok(()),
            Some(value) => Err(CodecError::UnexpectedField {
                tag: self.tag,
                value: value.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str) -> ModuleName {
        ModuleName::new(name).expect("valid module")
    }

    #[test]
    fn encodes_exact_wire_text() {
        let execute = Message::Execute(ExecuteRequest::new("sum", "sum", 10, -3).expect("valid"));
        assert_eq!(execute.encode(), b"e;sum;sum;10;-3;");
        assert_eq!(
            Message::ExecuteResult {
                module: module("div"),
                result: 1
            }
            .encode(),
            b"r;div;1;"
        );
        assert_eq!(
            Message::LoadRequest {
                module: module("div")
            }
            .encode(),
            b"l;div;"
        );
        assert_eq!(
            Message::LoadResponse {
                module: module("div"),
                bytes: b"abc".to_vec()
            }
            .encode(),
            b"c;div;YWJj;"
        );
        assert_eq!(
            Message::NotFound {
                module: module("div")
            }
            .encode(),
            b"n;div;"
        );
    }

    #[test]
    fn decodes_every_tag() {
        let samples: [&[u8]; 5] = [
            b"e;sum;sum;10;10;",
            b"r;sum;20;",
            b"l;sum;",
            b"c;sum;YWJj;",
            b"n;sum;",
        ];
        for sample in samples {
            let message = Message::decode(sample).expect("decode");
            assert_eq!(message.module().as_str(), "sum");
            assert_eq!(message.encode(), sample);
        }
    }

    #[test]
    fn extreme_arguments_survive() {
        let message = Message::Execute(
            ExecuteRequest::new("m", "f", i32::MIN, i32::MAX).expect("valid"),
        );
        assert_eq!(Message::decode(&message.encode()), Ok(message));
    }

    #[test]
    fn rejects_unknown_tag() {
        assert_eq!(
            Message::decode(b"x;sum;"),
            Err(CodecError::UnknownTag("x".to_string()))
        );
        assert_eq!(
            Message::decode(b";"),
            Err(CodecError::UnknownTag(String::new()))
        );
    }

    #[test]
    fn rejects_missing_fields() {
        assert_eq!(
            Message::decode(b"e;sum;sum;10;"),
            Err(CodecError::MissingField {
                tag: 'e',
                field: "arg2"
            })
        );
        assert_eq!(
            Message::decode(b"r;sum;"),
            Err(CodecError::MissingField {
                tag: 'r',
                field: "result"
            })
        );
    }

    #[test]
    fn rejects_structural_errors() {
        assert_eq!(Message::decode(b""), Err(CodecError::MissingTerminator));
        assert_eq!(Message::decode(b"n;sum"), Err(CodecError::MissingTerminator));
        assert_eq!(Message::decode(&[b'n', b';', 0xff, b';']), Err(CodecError::NotUtf8));
        assert!(matches!(
            Message::decode(b"n;sum;extra;"),
            Err(CodecError::UnexpectedField { tag: 'n', .. })
        ));
    }

    #[test]
    fn rejects_invalid_fields() {
        assert!(matches!(
            Message::decode(b"e;sum;sum;ten;10;"),
            Err(CodecError::InvalidField { field: "arg1", .. })
        ));
        assert!(matches!(
            Message::decode(b"r;sum;99999999999;"),
            Err(CodecError::InvalidField { field: "result", .. })
        ));
        assert!(matches!(
            Message::decode(b"l;;"),
            Err(CodecError::InvalidField { field: "module", .. })
        ));
        assert!(matches!(
            Message::decode(b"c;sum;!!!;"),
            Err(CodecError::InvalidField { field: "bytes", .. })
        ));
    }

    #[test]
    fn frames_carry_sequence() {
        let message = Message::NotFound {
            module: module("sum"),
        };
        let frame = message.to_frame(42).expect("frame");
        assert_eq!(Message::from_frame(&frame), Ok((42, message)));

        let mut corrupted = frame;
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0x20;
        assert!(matches!(
            Message::from_frame(&corrupted),
            Err(CodecError::Frame(WireError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn frame_len_matches_the_frame() {
        for size in [0, 1, 2, 3, 1_000] {
            let message = Message::LoadResponse {
                module: module("sum"),
                bytes: vec![7; size],
            };
            let frame = message.to_frame(0).expect("frame");
            assert_eq!(message.frame_len(), frame.len(), "{size} bytes");
        }

        let oversized = Message::LoadResponse {
            module: module("sum"),
            bytes: vec![0; 60_000],
        };
        assert!(!oversized.fits_in_frame());
        assert!(matches!(
            oversized.to_frame(0),
            Err(CodecError::Frame(WireError::FrameTooLarge { .. }))
        ));
    }

    fn random_name(prefix: char) -> String {
        let len = faasnet_sim::sim_random_range(0..12usize);
        let mut name = String::from(prefix);
        for _ in 0..len {
            let c = b"abcdefghijklmnopqrstuvwxyz0123456789_-."[faasnet_sim::sim_random_range(0..39usize)];
            name.push(char::from(c));
        }
        name
    }

    fn random_message() -> Message {
        let module = module(&random_name('m'));
        match faasnet_sim::sim_random_range(0..5u8) {
            0 => Message::Execute(ExecuteRequest {
                module,
                function: FunctionName::new(random_name('f')).expect("valid function"),
                arg1: faasnet_sim::sim_random(),
                arg2: faasnet_sim::sim_random(),
            }),
            1 => Message::ExecuteResult {
                module,
                result: faasnet_sim::sim_random(),
            },
            2 => Message::LoadRequest { module },
            3 => {
                let len = faasnet_sim::sim_random_range(0..64usize);
                let bytes = (0..len).map(|_| faasnet_sim::sim_random::<u8>()).collect();
                Message::LoadResponse { module, bytes }
            }
            _ => Message::NotFound { module },
        }
    }

    #[test]
    fn random_messages_survive_encoding() {
        for seed in 1..=20 {
            faasnet_sim::set_sim_seed(seed);
            for _ in 0..200 {
                let message = random_message();
                let encoded = message.encode();
                assert_eq!(Message::decode(&encoded), Ok(message.clone()), "seed {seed}");
                assert_eq!(message.frame_len(), encoded.len() + wire::HEADER_SIZE);
            }
        }
        faasnet_sim::reset_sim_rng();
    }

    #[test]
    fn empty_bytecode_survives_encoding() {
        let message = Message::LoadResponse {
            module: module("m"),
            bytes: Vec::new(),
        };
        assert_eq!(message.encode(), b"c;m;;");
        assert_eq!(Message::decode(b"c;m;;"), Ok(message));
    }

    #[test]
    fn display_hides_bytecode() {
        let message = Message::LoadResponse {
            module: module("sum"),
            bytes: vec![0; 300],
        };
        assert_eq!(message.to_string(), "c;sum;<300 bytes>;");
    }
}
