pub mod resolver;

pub use resolver::{find_entrance, resolve, ResolvedEntrance};
