//! Version-dependent protocol behaviour.

use ottoman_config::ProtocolVersion;

const LEGACY_RENDER: ProtocolVersion = ProtocolVersion::new(0, 9, 0);
const INLINE_RENDER: ProtocolVersion = ProtocolVersion::new(0, 10, 0);
const DESIGN_DOCUMENTS: ProtocolVersion = ProtocolVersion::new(0, 11, 0);
const SECURITY_OBJECT: ProtocolVersion = ProtocolVersion::new(0, 11, 1);
const VIEW_LIBRARY: ProtocolVersion = ProtocolVersion::new(1, 1, 0);

/// Which rendering and validation commands a host version speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFamily {
    /// Only the view commands.
    ViewsOnly,
    /// `show_doc`, `list_begin`, `list_row`, `list_tail`, `validate`.
    LegacyRender,
    /// `show`, `list`, `filter`, `update`, `validate` with inline sources.
    InlineRender,
    /// The `ddoc` command and its sub-commands.
    DesignDocuments,
}

/// Protocol behaviour selected by the host version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    version: ProtocolVersion,
}

impl Dialect {
    /// Dialect for the given host version.
    #[must_use]
    pub const fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }

    /// The host version this dialect was built for.
    #[must_use]
    pub const fn version(self) -> ProtocolVersion {
        self.version
    }

    /// Rendering command set available to this host.
    #[must_use]
    pub fn family(self) -> CommandFamily {
        if self.version >= DESIGN_DOCUMENTS {
            CommandFamily::DesignDocuments
        } else if self.version >= INLINE_RENDER {
            CommandFamily::InlineRender
        } else if self.version >= LEGACY_RENDER {
            CommandFamily::LegacyRender
        } else {
            CommandFamily::ViewsOnly
        }
    }

    /// Errors and log lines are arrays rather than objects.
    #[must_use]
    pub fn tagged_arrays(self) -> bool {
        self.version >= DESIGN_DOCUMENTS
    }

    /// Response objects may carry `json` and `base64` content.
    #[must_use]
    pub fn rich_responses(self) -> bool {
        self.version >= INLINE_RENDER
    }

    /// Validate functions receive the security object.
    #[must_use]
    pub fn passes_security_object(self) -> bool {
        self.version >= SECURITY_OBJECT
    }

    /// Filter functions receive the user context as a third argument.
    #[must_use]
    pub fn passes_filter_userctx(self) -> bool {
        self.version < SECURITY_OBJECT
    }

    /// `add_lib` is available and map functions may `require`.
    #[must_use]
    pub fn view_library(self) -> bool {
        self.version >= VIEW_LIBRARY
    }

    /// The `views` ddoc sub-command is available.
    #[must_use]
    pub fn view_filters(self) -> bool {
        self.version > VIEW_LIBRARY
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::ancient(ProtocolVersion::new(0, 8, 0), CommandFamily::ViewsOnly)]
    #[case::legacy(ProtocolVersion::new(0, 9, 1), CommandFamily::LegacyRender)]
    #[case::inline(ProtocolVersion::new(0, 10, 2), CommandFamily::InlineRender)]
    #[case::ddoc(ProtocolVersion::new(0, 11, 0), CommandFamily::DesignDocuments)]
    #[case::newest(ProtocolVersion::new(999, 999, 999), CommandFamily::DesignDocuments)]
    fn selects_command_family(#[case] version: ProtocolVersion, #[case] family: CommandFamily) {
        assert_eq!(Dialect::new(version).family(), family);
    }

    #[test]
    fn security_object_and_filter_userctx_are_exclusive() {
        let before = Dialect::new(ProtocolVersion::new(0, 11, 0));
        let after = Dialect::new(ProtocolVersion::new(0, 11, 1));
        assert!(before.passes_filter_userctx());
        assert!(!before.passes_security_object());
        assert!(!after.passes_filter_userctx());
        assert!(after.passes_security_object());
    }

    #[test]
    fn view_filters_need_a_release_after_one_one() {
        assert!(!Dialect::new(ProtocolVersion::new(1, 1, 0)).view_filters());
        assert!(Dialect::new(ProtocolVersion::new(1, 1, 1)).view_filters());
        assert!(Dialect::new(ProtocolVersion::new(1, 1, 0)).view_library());
    }
}
