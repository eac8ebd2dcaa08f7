use crate::storage::compile_pattern;
use crate::utils::paths::agency_of;
use common::Result;

/// Which dockets a run should touch. Built once, shared read-only.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    agency: Option<String>,
    docket_pattern: Option<glob::Pattern>,
}

impl Filters {
    pub fn new(agency: Option<&str>, docket_pattern: Option<&str>) -> Result<Self> {
        let agency = agency
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_uppercase);
        let docket_pattern = docket_pattern
            .filter(|p| !p.is_empty())
            .map(compile_pattern)
            .transpose()?;

        Ok(Self {
            agency,
            docket_pattern,
        })
    }

    pub fn agency(&self) -> Option<&str> {
        self.agency.as_deref()
    }

    pub fn accepts_agency(&self, agency: &str) -> bool {
        self.agency
            .as_deref()
            .is_none_or(|wanted| wanted.eq_ignore_ascii_case(agency))
    }

    pub fn should_process(&self, docket_name: &str) -> bool {
        if !self.accepts_agency(&agency_of(docket_name)) {
            return false;
        }
        let leaf = docket_name.rsplit('/').next().unwrap_or(docket_name);
        self.docket_pattern
            .as_ref()
            .is_none_or(|pattern| pattern.matches(leaf))
    }

    /// The pattern itself when it names a single docket.
    pub fn exact_docket(&self) -> Option<&str> {
        let pattern = self.docket_pattern.as_ref()?.as_str();
        if pattern.contains(['*', '?', '[']) {
            None
        } else {
            Some(pattern)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_filters_accept_everything() {
        let filters = Filters::default();
        assert!(filters.should_process("DEA-2016-0015"));
        assert!(filters.should_process("noseparator"));
        assert_eq!(filters.exact_docket(), None);
    }

    #[test]
    fn test_agency_filter_is_case_insensitive() {
        let filters = Filters::new(Some("dea"), None).unwrap();
        assert_eq!(filters.agency(), Some("DEA"));
        assert!(filters.should_process("DEA-2016-0015"));
        assert!(filters.should_process("dea-2016-0015"));
        assert!(!filters.should_process("FAA-2000-7032"));
        assert!(filters.accepts_agency("Dea"));
    }

    #[test]
    fn test_docket_pattern() {
        let filters = Filters::new(None, Some("CMS-2025-*")).unwrap();
        assert!(filters.should_process("CMS-2025-0020"));
        assert!(!filters.should_process("CMS-2024-0001"));
        assert!(filters.should_process("CMS/CMS-2025-0020"));
        assert_eq!(filters.exact_docket(), None);

        let filters = Filters::new(None, Some("CMS-202[45]-00?0")).unwrap();
        assert!(filters.should_process("CMS-2024-0010"));
        assert!(!filters.should_process("CMS-2023-0010"));
    }

    #[test]
    fn test_both_filters_must_pass() {
        let filters = Filters::new(Some("FAA"), Some("FAA-2000-7032")).unwrap();
        assert!(filters.should_process("FAA-2000-7032"));
        assert!(!filters.should_process("FAA-2000-7033"));
        assert!(!filters.should_process("DEA-2000-7032"));
        assert_eq!(filters.exact_docket(), Some("FAA-2000-7032"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(Filters::new(None, Some("CMS-[")).is_err());
    }
}
