pub mod acceptor;
pub mod transport;

pub use acceptor::{spawn_accept_loop, AcceptorHandle};
pub use transport::Transport;
