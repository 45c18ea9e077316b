//! Database names and the name ↔ path mapping
//!
//! A database has a logical name chosen by the caller (which may contain `/`
//! to express hierarchy) and a flat file inside the server root:
//!
//! ```text
//! logical name      file in <root>
//! "test"        ->  test.strata
//! "team/inbox"  ->  team:inbox.strata
//! ```
//!
//! The translation replaces every `/` with `:` and appends [`DATABASE_SUFFIX`];
//! the inverse strips the suffix and maps `:` back to `/`. Because `:` is never
//! accepted inside a logical name, the mapping is a bijection between valid
//! names and file names.
//!
//! ## Validation
//!
//! Which characters are legal is decided by a [`NamePolicy`]. The default,
//! [`PermittedChars`], accepts `a-z 0-9 _ $ ( ) / + -`. Independent of the
//! policy, names must be non-empty, at most [`MAX_DATABASE_NAME_LENGTH`]
//! bytes, and must not contain `:`, `\` or NUL.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Suffix appended to every database file in the server root
pub const DATABASE_SUFFIX: &str = ".strata";

/// Maximum length of a database name in bytes
///
/// Leaves room for the suffix under the common 255-byte file name limit.
pub const MAX_DATABASE_NAME_LENGTH: usize = 240;

/// Characters rejected regardless of policy
const RESERVED_CHARS: [char; 3] = [':', '\\', '\0'];

/// Error when validating a database name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseNameError {
    /// Name is empty
    Empty,
    /// Name exceeds maximum length
    TooLong {
        /// Actual length of the name in bytes
        length: usize,
        /// Maximum allowed length
        max: usize,
    },
    /// Name contains a character the policy does not allow
    InvalidChar {
        /// The invalid character
        char: char,
        /// Position of the invalid character
        position: usize,
    },
    /// Policy rejected the name as a whole
    Rejected,
}

impl fmt::Display for DatabaseNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseNameError::Empty => write!(f, "database name cannot be empty"),
            DatabaseNameError::TooLong { length, max } => {
                write!(f, "database name too long: {} bytes (max {})", length, max)
            }
            DatabaseNameError::InvalidChar { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
            DatabaseNameError::Rejected => write!(f, "database name rejected by name policy"),
        }
    }
}

impl std::error::Error for DatabaseNameError {}

// ============================================================================
// Name Policies
// ============================================================================

/// Decides which database names are legal
///
/// Any `Fn(&str) -> bool` is a policy, so ad-hoc rules can be passed as
/// closures. Structural checks (empty, length, reserved characters) run before
/// the policy and cannot be relaxed by it.
pub trait NamePolicy: Send + Sync {
    /// Return true if `name` is acceptable
    fn is_legal(&self, name: &str) -> bool;

    /// Validate `name`, explaining a rejection
    ///
    /// The default maps a false [`is_legal`](Self::is_legal) to
    /// [`DatabaseNameError::Rejected`].
    fn check(&self, name: &str) -> Result<(), DatabaseNameError> {
        if self.is_legal(name) {
            Ok(())
        } else {
            Err(DatabaseNameError::Rejected)
        }
    }
}

impl<F> NamePolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_legal(&self, name: &str) -> bool {
        self(name)
    }
}

/// Check if a character is in the default permitted set
#[inline]
pub fn is_permitted_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '_' | '$' | '(' | ')' | '/' | '+' | '-')
}

fn first_invalid(name: &str) -> Option<(usize, char)> {
    name.chars().enumerate().find(|(_, c)| !is_permitted_char(*c))
}

/// Default policy: every character in `a-z 0-9 _ $ ( ) / + -`
#[derive(Debug, Clone, Copy, Default)]
pub struct PermittedChars;

impl NamePolicy for PermittedChars {
    fn is_legal(&self, name: &str) -> bool {
        first_invalid(name).is_none()
    }

    fn check(&self, name: &str) -> Result<(), DatabaseNameError> {
        match first_invalid(name) {
            Some((position, char)) => Err(DatabaseNameError::InvalidChar { char, position }),
            None => Ok(()),
        }
    }
}

/// CouchDB rule: like [`PermittedChars`], but must start with `a-z`
#[derive(Debug, Clone, Copy, Default)]
pub struct CouchStyle;

impl NamePolicy for CouchStyle {
    fn is_legal(&self, name: &str) -> bool {
        self.check(name).is_ok()
    }

    fn check(&self, name: &str) -> Result<(), DatabaseNameError> {
        match name.chars().next() {
            Some(first) if !first.is_ascii_lowercase() => Err(DatabaseNameError::InvalidChar {
                char: first,
                position: 0,
            }),
            _ => PermittedChars.check(name),
        }
    }
}

/// Validate a name against the structural rules and `policy`
pub fn validate_name(name: &str, policy: &dyn NamePolicy) -> Result<(), DatabaseNameError> {
    if name.is_empty() {
        return Err(DatabaseNameError::Empty);
    }

    if name.len() > MAX_DATABASE_NAME_LENGTH {
        return Err(DatabaseNameError::TooLong {
            length: name.len(),
            max: MAX_DATABASE_NAME_LENGTH,
        });
    }

    if let Some((position, char)) = name
        .chars()
        .enumerate()
        .find(|(_, c)| RESERVED_CHARS.contains(c))
    {
        return Err(DatabaseNameError::InvalidChar { char, position });
    }

    policy.check(name)
}

// ============================================================================
// Name <-> File Translation
// ============================================================================

/// File name (relative to the root) that stores database `name`
///
/// Does not validate; callers go through [`NameResolver`].
pub fn file_name_for(name: &str) -> String {
    format!("{}{}", name.replace('/', ":"), DATABASE_SUFFIX)
}

/// Logical name stored in `file_name`, or None if it is not a database file
pub fn name_for_file(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(DATABASE_SUFFIX)?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.replace(':', "/"))
}

// ============================================================================
// DatabaseName
// ============================================================================

/// A logical database name that passed the default policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatabaseName(String);

impl DatabaseName {
    /// Create a new DatabaseName, validating with [`PermittedChars`]
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNameError` if the name is invalid.
    pub fn new(name: impl Into<String>) -> Result<Self, DatabaseNameError> {
        Self::with_policy(name, &PermittedChars)
    }

    /// Create a new DatabaseName, validating with `policy`
    pub fn with_policy(
        name: impl Into<String>,
        policy: &dyn NamePolicy,
    ) -> Result<Self, DatabaseNameError> {
        let name = name.into();
        validate_name(&name, policy)?;
        Ok(DatabaseName(name))
    }

    /// Get the name as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string
    pub fn into_inner(self) -> String {
        self.0
    }

    /// File name this database is stored under
    pub fn file_name(&self) -> String {
        file_name_for(&self.0)
    }
}

impl AsRef<str> for DatabaseName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for DatabaseName {
    type Error = DatabaseNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        DatabaseName::new(value)
    }
}

impl TryFrom<String> for DatabaseName {
    type Error = DatabaseNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DatabaseName::new(value)
    }
}

// ============================================================================
// NameResolver
// ============================================================================

/// Validates names and maps them to paths under a root directory
///
/// Pure: never touches the filesystem.
#[derive(Clone)]
pub struct NameResolver {
    root: PathBuf,
    policy: Arc<dyn NamePolicy>,
}

impl NameResolver {
    /// Resolver for `root` using the default [`PermittedChars`] policy
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_policy(root, Arc::new(PermittedChars))
    }

    /// Resolver for `root` using a custom policy
    pub fn with_policy(root: impl Into<PathBuf>, policy: Arc<dyn NamePolicy>) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    /// Root directory paths are resolved against
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate `name` against the structural rules and this resolver's policy
    pub fn validate(&self, name: &str) -> Result<(), DatabaseNameError> {
        validate_name(name, self.policy.as_ref())
    }

    /// Path of the database named `name`, or None if the name is invalid
    pub fn resolve_path(&self, name: &str) -> Option<PathBuf> {
        self.validate(name).ok()?;
        Some(self.root.join(file_name_for(name)))
    }
}

impl fmt::Debug for NameResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameResolver")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
