pub mod add;
pub mod common;
pub mod completions;
pub mod delete;
pub mod done;
pub mod edit;
pub mod list;
pub mod lists;
pub mod new_list;
pub mod retry;
pub mod status;
pub mod sync;

pub use add::run_add;
pub use completions::run_completions;
pub use delete::run_delete;
pub use done::run_done;
pub use edit::run_edit;
pub use list::run_list;
pub use lists::run_lists;
pub use new_list::run_new_list;
pub use retry::run_retry;
pub use status::run_status;
pub use sync::run_sync;
