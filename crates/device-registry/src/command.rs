use crate::{RegistryError, Result};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Open key-value payload as it arrives on the wire.
pub type Params = Map<String, Value>;

/// Largest integer a JSON number can carry without losing precision.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Unlock,
    Lock,
    Dispense,
    RegisterFingerprint,
    CheckHand,
}

impl CommandKind {
    pub const ALL: [CommandKind; 5] = [
        CommandKind::Unlock,
        CommandKind::Lock,
        CommandKind::Dispense,
        CommandKind::RegisterFingerprint,
        CommandKind::CheckHand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Unlock => "unlock",
            CommandKind::Lock => "lock",
            CommandKind::Dispense => "dispense",
            CommandKind::RegisterFingerprint => "register_fingerprint",
            CommandKind::CheckHand => "check_hand",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        CommandKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RegistryError::UnknownCommand(s.to_string()))
    }
}

/// Target of a `dispense` command: which motor to turn and which segment of
/// its carousel to bring to the outlet.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DispenseParams {
    pub motor_id: u64,
    pub segment: u64,
}

impl DispenseParams {
    /// Typed extraction of `motor_id` and `segment`, checked in that order.
    pub fn from_params(params: &Params) -> Result<Self> {
        let field = |name: &'static str| {
            non_negative_integer(params.get(name)).ok_or(RegistryError::InvalidParams {
                command: CommandKind::Dispense,
                field: name,
            })
        };
        Ok(Self {
            motor_id: field("motor_id")?,
            segment: field("segment")?,
        })
    }

    pub fn to_params(self) -> Params {
        let mut out = Params::new();
        out.insert("motor_id".to_string(), Value::from(self.motor_id));
        out.insert("segment".to_string(), Value::from(self.segment));
        out
    }
}

/// Parameters attached to a pending command.
///
/// `dispense` is the only kind with known rules, so it is the only typed
/// variant. The raw payload is kept next to the typed view so the device
/// receives exactly what the operator sent.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandParams {
    Dispense { target: DispenseParams, raw: Params },
    Opaque(Option<Params>),
}

impl CommandParams {
    /// Validate `params` for `kind` and build the typed view.
    pub fn extract(kind: CommandKind, params: Option<Params>) -> Result<Self> {
        match kind {
            CommandKind::Dispense => {
                let raw = params.unwrap_or_default();
                Ok(CommandParams::Dispense {
                    target: DispenseParams::from_params(&raw)?,
                    raw,
                })
            }
            _ => Ok(CommandParams::Opaque(params)),
        }
    }

    pub fn dispense(&self) -> Option<DispenseParams> {
        match self {
            CommandParams::Dispense { target, .. } => Some(*target),
            CommandParams::Opaque(_) => None,
        }
    }

    /// The payload as it was submitted (`None` when nothing was sent).
    pub fn raw(&self) -> Option<&Params> {
        match self {
            CommandParams::Dispense { raw, .. } => Some(raw),
            CommandParams::Opaque(raw) => raw.as_ref(),
        }
    }
}

impl Serialize for CommandParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        self.raw().serialize(serializer)
    }
}

/// Accepts JSON integers and integral floats (`2` and `2.0`), rejects
/// negatives, fractions, strings and anything else.
fn non_negative_integer(value: Option<&Value>) -> Option<u64> {
    let Value::Number(n) = value? else {
        return None;
    };
    if let Some(u) = n.as_u64() {
        return Some(u);
    }
    let f = n.as_f64()?;
    if f >= 0.0 && f.fract() == 0.0 && f <= MAX_SAFE_INTEGER {
        Some(f as u64)
    } else {
        None
    }
}
