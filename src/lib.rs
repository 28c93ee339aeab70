pub mod clock;
pub mod config;
pub mod dst;
pub mod repo;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError};
pub use repo::{
    Book, BookPage, Error, Filter, Fragment, FragmentView, Limit, RepoConfig, Repository,
    Scratchpad, TranslationVersion,
};
pub use store::{FsyncPolicy, Store, StoreConfig, StoreError};
