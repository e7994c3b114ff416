//! Location Stream Adapter
//!
//! WebSocket client for the live location stream:
//!
//! - **Connection**: one process-wide link with reconnect and heartbeat
//! - **Registry**: named subscribers receiving every decoded feature
//! - **Codec**: one GeoJSON feature per text frame
//! - **Endpoint**: stream URL derived from the app origin

pub mod codec;
pub mod connection;
pub mod endpoint;
pub mod heartbeat;
pub mod reconnect;
pub mod registry;

pub use codec::{CodecError, FeatureCodec};
pub use connection::{
    ConnectionState, SharedStreamConnection, StreamConnection, StreamConnectionConfig, StreamError,
};
pub use endpoint::{
    DEFAULT_DEV_PORT, EndpointError, STREAM_PATH, stream_url_for_origin,
};
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use registry::{DispatchReport, SubscriberError, SubscriberFn, SubscriberRegistry};
