use std::fmt;

use crate::upload::types::CandidateFile;
use crate::utils::format_size;

/// Default per-file ceiling when the caller does not set one (10 MiB).
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Admission constraints, supplied once per engine and re-checked on
/// every add.
#[derive(Debug, Clone)]
pub struct Constraints {
    /// Ceiling on persisted attachments plus live tasks.
    pub max_files: Option<usize>,
    pub max_size_bytes: Option<u64>,
    /// Comma-separated accept list mixing extensions and MIME patterns,
    /// e.g. ".pdf,image/*,application/msword".
    pub accept: Option<String>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_files: None,
            max_size_bytes: Some(DEFAULT_MAX_SIZE_BYTES),
            accept: None,
        }
    }
}

/// Why a candidate was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    TooManyFiles { limit: usize },
    FileTooLarge { limit: u64 },
    UnsupportedType,
}

impl RejectReason {
    /// Stable machine-readable code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooManyFiles { .. } => "too-many-files",
            Self::FileTooLarge { .. } => "file-too-large",
            Self::UnsupportedType => "unsupported-type",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyFiles { limit } => {
                write!(f, "no more than {limit} files can be attached")
            }
            Self::FileTooLarge { limit } => {
                write!(f, "file exceeds the {} limit", format_size(*limit))
            }
            Self::UnsupportedType => write!(f, "file type is not accepted"),
        }
    }
}

/// A candidate handed back to the caller together with the reason it
/// was not admitted.
#[derive(Debug)]
pub struct Rejection {
    pub file: CandidateFile,
    pub reason: RejectReason,
}

/// Result of partitioning one selection.
#[derive(Debug, Default)]
pub struct Validation {
    pub accepted: Vec<CandidateFile>,
    pub rejected: Vec<Rejection>,
}

/// Partition `candidates` into accepted and rejected files.
///
/// `existing` counts slots already taken (persisted attachments plus
/// live tasks). The ceiling is applied in selection order, so the
/// earliest files win the remaining slots. Pure: no notification or
/// queueing happens here.
pub fn validate(
    candidates: Vec<CandidateFile>,
    existing: usize,
    constraints: &Constraints,
) -> Validation {
    let rules = constraints
        .accept
        .as_deref()
        .map(parse_accept)
        .filter(|rules| !rules.is_empty());

    let mut out = Validation::default();

    for file in candidates {
        if let Some(limit) = constraints.max_files {
            if existing + out.accepted.len() >= limit {
                out.rejected.push(Rejection {
                    file,
                    reason: RejectReason::TooManyFiles { limit },
                });
                continue;
            }
        }

        if let Some(limit) = constraints.max_size_bytes {
            if file.size_bytes > limit {
                out.rejected.push(Rejection {
                    file,
                    reason: RejectReason::FileTooLarge { limit },
                });
                continue;
            }
        }

        if let Some(rules) = &rules {
            if !rules.iter().any(|rule| rule.matches(&file)) {
                out.rejected.push(Rejection {
                    file,
                    reason: RejectReason::UnsupportedType,
                });
                continue;
            }
        }

        out.accepted.push(file);
    }

    out
}

enum AcceptRule {
    /// ".pdf" (stored lowercase, leading dot included)
    Extension(String),
    /// "application/pdf"
    MimeExact(String),
    /// "image/*" (stored as "image/")
    MimePrefix(String),
}

impl AcceptRule {
    fn matches(&self, file: &CandidateFile) -> bool {
        match self {
            Self::Extension(ext) => file.name.to_lowercase().ends_with(ext.as_str()),
            Self::MimeExact(mime) => file.mime_type.eq_ignore_ascii_case(mime),
            Self::MimePrefix(prefix) => file.mime_type.to_lowercase().starts_with(prefix.as_str()),
        }
    }
}

fn parse_accept(accept: &str) -> Vec<AcceptRule> {
    accept
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            let token = token.to_lowercase();
            if let Some(prefix) = token.strip_suffix("/*") {
                AcceptRule::MimePrefix(format!("{prefix}/"))
            } else if token.contains('/') {
                AcceptRule::MimeExact(token)
            } else if token.starts_with('.') {
                AcceptRule::Extension(token)
            } else {
                AcceptRule::Extension(format!(".{token}"))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, mime: &str, size: usize) -> CandidateFile {
        CandidateFile::new(name, mime, vec![0u8; size])
    }

    #[test]
    fn earliest_files_win_the_remaining_slots() {
        let constraints = Constraints {
            max_files: Some(2),
            max_size_bytes: Some(1_000_000),
            accept: None,
        };
        let candidates = vec![
            candidate("a.pdf", "application/pdf", 500_000),
            candidate("b.pdf", "application/pdf", 500_000),
            candidate("c.pdf", "application/pdf", 500_000),
        ];

        let result = validate(candidates, 0, &constraints);

        assert_eq!(result.accepted.len(), 2);
        assert_eq!(result.accepted[0].name, "a.pdf");
        assert_eq!(result.accepted[1].name, "b.pdf");
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].file.name, "c.pdf");
        assert_eq!(result.rejected[0].reason.as_str(), "too-many-files");
    }

    #[test]
    fn existing_attachments_count_against_the_ceiling() {
        let constraints = Constraints {
            max_files: Some(3),
            ..Constraints::default()
        };
        let candidates = vec![
            candidate("a.png", "image/png", 10),
            candidate("b.png", "image/png", 10),
        ];

        let result = validate(candidates, 2, &constraints);

        assert_eq!(result.accepted.len(), 1);
        assert_eq!(result.rejected.len(), 1);
    }

    #[test]
    fn oversized_files_are_rejected_per_file() {
        let constraints = Constraints {
            max_size_bytes: Some(100),
            ..Constraints::default()
        };
        let candidates = vec![
            candidate("small.txt", "text/plain", 50),
            candidate("big.txt", "text/plain", 200),
        ];

        let result = validate(candidates, 0, &constraints);

        assert_eq!(result.accepted.len(), 1);
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].reason.as_str(), "file-too-large");
        assert!(result.rejected[0]
            .reason
            .to_string()
            .contains("100 B"));
    }

    #[test]
    fn accept_pattern_matches_extensions_and_mime_wildcards() {
        let constraints = Constraints {
            max_size_bytes: None,
            accept: Some(".pdf, image/*".to_string()),
            ..Constraints::default()
        };
        let candidates = vec![
            candidate("doc.PDF", "application/pdf", 10),
            candidate("photo.jpg", "image/jpeg", 10),
            candidate("notes.txt", "text/plain", 10),
        ];

        let result = validate(candidates, 0, &constraints);

        assert_eq!(result.accepted.len(), 2);
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].file.name, "notes.txt");
        assert_eq!(result.rejected[0].reason, RejectReason::UnsupportedType);
    }

    #[test]
    fn exact_mime_and_bare_extension_tokens_work() {
        let constraints = Constraints {
            max_size_bytes: None,
            accept: Some("application/pdf,docx".to_string()),
            ..Constraints::default()
        };
        let candidates = vec![
            candidate("doc.pdf", "application/PDF", 10),
            candidate("letter.docx", "application/octet-stream", 10),
            candidate("image.png", "image/png", 10),
        ];

        let result = validate(candidates, 0, &constraints);

        assert_eq!(result.accepted.len(), 2);
        assert_eq!(result.rejected.len(), 1);
    }

    #[test]
    fn blank_accept_pattern_admits_everything() {
        let constraints = Constraints {
            max_size_bytes: None,
            accept: Some("  ".to_string()),
            ..Constraints::default()
        };
        let result = validate(vec![candidate("a.bin", "application/octet-stream", 10)], 0, &constraints);

        assert_eq!(result.accepted.len(), 1);
        assert!(result.rejected.is_empty());
    }

    #[test]
    fn no_constraints_means_everything_passes() {
        let constraints = Constraints {
            max_files: None,
            max_size_bytes: None,
            accept: None,
        };
        let candidates = vec![
            candidate("a.bin", "application/octet-stream", 50_000_000),
            candidate("b.bin", "application/octet-stream", 1),
        ];

        let result = validate(candidates, 10, &constraints);

        assert_eq!(result.accepted.len(), 2);
        assert!(result.rejected.is_empty());
    }
}
