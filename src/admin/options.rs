use crate::db::Options;

/// Common options used when opening a database for administrative commands.
#[derive(Clone, Debug)]
pub struct AdminOpenOptions {
    /// Store options applied when an operation needs a full open.
    pub store: Options,
}

impl Default for AdminOpenOptions {
    fn default() -> Self {
        Self {
            store: Options {
                // Admin commands operate on existing databases and have no
                // use for the embedded registry or background work.
                create_if_missing: false,
                start_registry: false,
                auto_compact: None,
                ..Options::default()
            },
        }
    }
}
