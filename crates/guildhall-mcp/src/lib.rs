// SPDX-License-Identifier: MIT

pub mod discovery;
pub mod lifecycle;
pub mod port;
pub mod rpc_client;
pub mod transport;

pub use discovery::{discover, is_safe_plugin_name, GuildMember, MemberStatus};
pub use lifecycle::{LifecycleError, LifecycleManager};
pub use port::{PortError, PortRegistry, PORT_RANGE_END, PORT_RANGE_START};
pub use rpc_client::{RpcClient, RpcError};
pub use transport::{Dispatcher, McpError, McpTransport, StandardMcpHandler};
