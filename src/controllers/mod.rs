pub mod manager;
pub mod url_check;

pub use manager::Controller;
pub use manager::ControllerManager;
pub use manager::ReconcileResult;
pub use url_check::UrlCheckController;
