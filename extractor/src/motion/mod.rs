pub mod compose;
pub mod diff;
pub mod recolor;

pub use compose::compose;
pub use diff::diff;
pub use recolor::{recolor, RecolorOptions};
