//! Control inputs: the cluster-wide control record and the local surface

pub mod cluster;
pub mod local;
pub mod strategy;
pub mod watcher;

pub use cluster::ClusterControl;
pub use local::{install_signal_handlers, write_control_file, ControlFilePoller};
pub use strategy::{read_record, PollWatch, PushWatch, WatchMode, WatchStrategy};
pub use watcher::{ClusterControlWatcher, WatcherConfig};
