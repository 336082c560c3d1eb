//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Each pluggable backend (storage, account) exposes a `Registry` struct that
/// names itself as it appears in configuration and hands out its factory.
pub trait ImplementationRegistry {
	/// The name used under `implementations.<name>` in configuration files,
	/// for example "memory", "file" or "local".
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
