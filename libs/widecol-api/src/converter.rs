use crate::error::ConversionError;

/// Custom column converter plugin.
///
/// Solves one task: turn a stored byte form into display text and back.
/// Implementations are supplied by a plugin loader outside this crate and
/// reach the engine only through `TypeRegistry::register`.
///
/// Contract: for any `text` accepted by `to_bytes`,
/// `to_text(&to_bytes(text)?)` yields text that `to_bytes` maps to the same bytes.
pub trait TypeConverter: Send + Sync {
    /// Unique type name, matched case-insensitively by the registry.
    fn name(&self) -> &str;

    /// Decode stored bytes into display text.
    fn to_text(&self, bytes: &[u8]) -> Result<String, ConversionError>;

    /// Encode user-entered text into the stored byte form.
    fn to_bytes(&self, text: &str) -> Result<Vec<u8>, ConversionError>;
}
