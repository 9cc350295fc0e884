//! Gmail system labels and the flags derived from them

/// Well-known Gmail system label ids
pub mod labels {
    pub const INBOX: &str = "INBOX";
    pub const SENT: &str = "SENT";
    pub const UNREAD: &str = "UNREAD";
    pub const STARRED: &str = "STARRED";
}

/// Read/star/outbound flags computed from a label set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LabelFlags {
    /// No `UNREAD` label present
    pub is_read: bool,
    /// `STARRED` label present
    pub is_starred: bool,
    /// `SENT` label present
    pub is_outbound: bool,
}

impl LabelFlags {
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut flags = Self {
            is_read: true,
            ..Self::default()
        };
        for label in labels {
            match label.as_ref() {
                labels::UNREAD => flags.is_read = false,
                labels::STARRED => flags.is_starred = true,
                labels::SENT => flags.is_outbound = true,
                _ => {}
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_from_labels() {
        let flags = LabelFlags::from_labels(["INBOX", "UNREAD", "STARRED"]);
        assert!(!flags.is_read);
        assert!(flags.is_starred);
        assert!(!flags.is_outbound);
    }

    #[test]
    fn test_no_labels_is_read() {
        let flags = LabelFlags::from_labels(Vec::<String>::new());
        assert!(flags.is_read);
        assert!(!flags.is_starred);
    }

    #[test]
    fn test_sent_is_outbound() {
        assert!(LabelFlags::from_labels(["SENT"]).is_outbound);
    }
}
