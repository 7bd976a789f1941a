//! Pure, stateless transforms between the legacy and new data models.

mod blocks;
mod stats;
mod status;
mod time;
mod tree;

pub use blocks::{BlockOutcome, assemble_blocks, transform_block};
pub use stats::merge_stats;
pub use status::normalize_status;
pub use time::{now_ms, parse_timestamp_ms};
pub use tree::{
    TreeNode, build_message_tree, find_active_node_id, resolve_parent_through_skipped,
};
