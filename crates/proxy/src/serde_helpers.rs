// Serde's `default = "..."` expects helpers with the signature `fn() -> T`.
pub const fn default_true() -> bool {
    true
}
