//! Turns opaque RPC error text into a structured outcome.
//!
//! Order of checks, first hit wins:
//!
//! 1. freshness-token expiry markers
//! 2. program error code, via an ordered list of [`CodeMatcher`]s
//! 3. simulation failure
//! 4. insufficient funds
//! 5. anything else, truncated
//!
//! Program log lines are pulled out separately and only ever attached as
//! diagnostics.

use std::fmt;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::EnvelopeError;

/// Unknown errors are cut to this many characters.
pub const MAX_UNKNOWN_LEN: usize = 300;

const EXPIRY_MARKERS: [&str; 4] = [
    "BlockhashNotFound",
    "Blockhash not found",
    "block height exceeded",
    "TransactionExpired",
];

// ---------------------------------------------------------------------------
// Known program errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KnownError {
    pub code: u32,
    pub name: &'static str,
    pub message: &'static str,
}

/// Custom error codes of one program, built once and shared by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramErrorTable {
    entries: Vec<KnownError>,
}

impl ProgramErrorTable {
    pub fn new(entries: Vec<KnownError>) -> Self {
        ProgramErrorTable { entries }
    }

    /// The envelope program's Anchor error enum (codes start at 6000).
    pub fn envelope() -> Self {
        let known = |code, name, message| KnownError {
            code,
            name,
            message,
        };
        Self::new(vec![
            known(6000, "InvalidOwner", "You are not the owner of this envelope"),
            known(6001, "AlreadyClaimed", "You have already claimed this envelope"),
            known(6002, "NotAllowed", "You are not allowed to claim this envelope"),
            known(6003, "QuotaFull", "Maximum claimers reached"),
            known(6004, "Expired", "Envelope has expired"),
            known(6005, "NotExpired", "Envelope not expired yet (cannot refund)"),
            known(6006, "ExceedMaxCreate", "Amount exceeds maximum allowed"),
            known(6007, "NotExpired", "Envelope not expired yet"),
            known(6008, "MathOverflow", "Math calculation overflow"),
            known(6009, "InsufficientFunds", "Insufficient funds in envelope"),
            known(6010, "NothingToRefund", "Nothing to refund"),
        ])
    }

    pub fn lookup(&self, code: u32) -> Option<&KnownError> {
        self.entries.iter().find(|e| e.code == code)
    }
}

// ---------------------------------------------------------------------------
// Code matchers
// ---------------------------------------------------------------------------

/// One strategy for pulling a numeric program error code out of text.
pub trait CodeMatcher: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn extract(&self, raw: &str) -> Option<u32>;
}

/// `"err": {"InstructionError": [0, {"Custom": 6002}]}` embedded in text.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstructionErrorJson;

impl CodeMatcher for InstructionErrorJson {
    fn name(&self) -> &'static str {
        "instruction_error_json"
    }

    fn extract(&self, raw: &str) -> Option<u32> {
        let after = &raw[raw.find("\"err\":")? + "\"err\":".len()..];
        let open = after.find('{')?;
        if !after[..open].trim().is_empty() {
            return None;
        }

        let body = &after[open..];
        let mut depth = 0usize;
        let mut end = None;
        for (i, c) in body.char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        let value: Value = serde_json::from_str(&body[..end?]).ok()?;
        match value.get("InstructionError")?.get(1)?.get("Custom")? {
            Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// A regex whose first capture group is the code.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    name: &'static str,
    regex: Regex,
    radix: u32,
}

impl RegexMatcher {
    pub fn new(name: &'static str, pattern: &str, radix: u32) -> Result<Self, EnvelopeError> {
        let regex = Regex::new(pattern)
            .map_err(|e| EnvelopeError::Config(format!("matcher {name}: {e}")))?;
        Ok(RegexMatcher { name, regex, radix })
    }
}

impl CodeMatcher for RegexMatcher {
    fn name(&self) -> &'static str {
        self.name
    }

    fn extract(&self, raw: &str) -> Option<u32> {
        let digits = self.regex.captures(raw)?.get(1)?.as_str();
        u32::from_str_radix(digits, self.radix).ok()
    }
}

/// JSON first, then decimal regexes in several quoting styles, then hex.
pub fn default_matchers() -> Result<Vec<Box<dyn CodeMatcher>>, EnvelopeError> {
    let decimal = [
        ("custom_quoted_key", r#""Custom":\s*(\d+)"#),
        ("custom_quoted_value", r#""Custom":\s*"(\d+)""#),
        ("custom_bare", r"Custom:\s*(\d+)"),
        ("error_code", r"error code:\s*(\d+)"),
        ("anchor_error_number", r"Error Number:\s*(\d+)"),
    ];

    let mut matchers: Vec<Box<dyn CodeMatcher>> = vec![Box::new(InstructionErrorJson)];
    for (name, pattern) in decimal {
        matchers.push(Box::new(RegexMatcher::new(name, pattern, 10)?));
    }
    matchers.push(Box::new(RegexMatcher::new(
        "custom_program_error_hex",
        r"custom program error: 0x([0-9a-fA-F]+)",
        16,
    )?));
    Ok(matchers)
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    Expired,
    ProgramError {
        code: u32,
        known: Option<KnownError>,
    },
    SimulationFailed,
    InsufficientFunds,
    Unknown {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    pub classification: Classification,
    pub logs: Vec<String>,
}

impl ClassifiedError {
    pub fn is_expired(&self) -> bool {
        matches!(self.classification, Classification::Expired)
    }

    pub fn program_code(&self) -> Option<u32> {
        match self.classification {
            Classification::ProgramError { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Human-readable message, stable per classification.
    pub fn message(&self) -> String {
        match &self.classification {
            Classification::Expired => "Transaction expired. The blockhash is no longer valid. \
                 Build a new transaction and try again."
                .to_string(),
            Classification::ProgramError {
                known: Some(k), ..
            } => format!("{} - {}", k.name, k.message),
            Classification::ProgramError { code, known: None } => {
                format!("Custom program error code: {code}")
            }
            Classification::SimulationFailed => {
                "Transaction simulation failed. Check program logs for details.".to_string()
            }
            Classification::InsufficientFunds => {
                "Insufficient balance to pay for transaction".to_string()
            }
            Classification::Unknown { text } => text.clone(),
        }
    }

    pub fn into_error(self) -> EnvelopeError {
        let message = self.message();
        match self.classification {
            Classification::Expired => EnvelopeError::StaleFreshnessToken(message),
            Classification::ProgramError { code, known } => EnvelopeError::RemoteProgram {
                code,
                name: known.map(|k| k.name),
                message: known.map(|k| k.message.to_string()).unwrap_or(message),
            },
            _ => EnvelopeError::Rejected(message),
        }
    }
}

#[derive(Debug)]
pub struct ErrorClassifier {
    matchers: Vec<Box<dyn CodeMatcher>>,
    table: ProgramErrorTable,
    log_patterns: Vec<Regex>,
}

impl ErrorClassifier {
    pub fn new(table: ProgramErrorTable) -> Result<Self, EnvelopeError> {
        let log_patterns = [
            // Inside JSON or escaped text: stop at a quote, backslash or newline.
            r#"Program log: ([^"\\\n]+)"#,
            r"Program log: ([^\n]+)",
        ]
        .into_iter()
        .map(|p| Regex::new(p).map_err(|e| EnvelopeError::Config(format!("log pattern: {e}"))))
        .collect::<Result<Vec<_>, _>>()?;

        Ok(ErrorClassifier {
            matchers: default_matchers()?,
            table,
            log_patterns,
        })
    }

    /// Append a matcher; it runs after the built-in ones.
    pub fn with_matcher(mut self, matcher: Box<dyn CodeMatcher>) -> Self {
        self.matchers.push(matcher);
        self
    }

    pub fn table(&self) -> &ProgramErrorTable {
        &self.table
    }

    pub fn classify(&self, raw: &str) -> ClassifiedError {
        let classification = self.classification(raw);
        debug!(?classification, "classified remote error");
        ClassifiedError {
            classification,
            logs: self.extract_logs(raw),
        }
    }

    fn classification(&self, raw: &str) -> Classification {
        if EXPIRY_MARKERS.iter().any(|m| raw.contains(m)) {
            return Classification::Expired;
        }

        if let Some(code) = self.extract_code(raw) {
            return Classification::ProgramError {
                code,
                known: self.table.lookup(code).copied(),
            };
        }

        let lower = raw.to_ascii_lowercase();
        if lower.contains("simulation failed") {
            return Classification::SimulationFailed;
        }
        if lower.contains("insufficient funds") {
            return Classification::InsufficientFunds;
        }

        Classification::Unknown {
            text: truncate(raw),
        }
    }

    /// First code any matcher finds.
    pub fn extract_code(&self, raw: &str) -> Option<u32> {
        self.matchers.iter().find_map(|m| {
            let code = m.extract(raw)?;
            debug!(matcher = m.name(), code, "program error code extracted");
            Some(code)
        })
    }

    /// `Program log:` lines from the first pattern that finds any, in
    /// order, without duplicates.
    pub fn extract_logs(&self, raw: &str) -> Vec<String> {
        for pattern in &self.log_patterns {
            let mut logs: Vec<String> = Vec::new();
            for caps in pattern.captures_iter(raw) {
                if let Some(m) = caps.get(1) {
                    let line = m.as_str().trim().to_string();
                    if !line.is_empty() && !logs.contains(&line) {
                        logs.push(line);
                    }
                }
            }
            if !logs.is_empty() {
                return logs;
            }
        }
        Vec::new()
    }
}

fn truncate(raw: &str) -> String {
    if raw.chars().count() > MAX_UNKNOWN_LEN {
        let mut out: String = raw.chars().take(MAX_UNKNOWN_LEN).collect();
        out.push_str("...");
        out
    } else {
        raw.to_string()
    }
}
