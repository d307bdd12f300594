//! Discovery service messages
//!
//! Hand-maintained subset of the discovery and operation protos, only the
//! fields the transport reads.

/// Method path of `ListEndpoints`
pub const LIST_ENDPOINTS_PATH: &str = "/Ydb.Discovery.V1.DiscoveryService/ListEndpoints";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEndpointsRequest {
    #[prost(string, tag = "1")]
    pub database: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub service: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EndpointInfo {
    #[prost(string, tag = "1")]
    pub address: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub port: u32,
    #[prost(float, tag = "3")]
    pub load_factor: f32,
    #[prost(bool, tag = "4")]
    pub ssl: bool,
    #[prost(string, repeated, tag = "5")]
    pub service: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, tag = "6")]
    pub location: ::prost::alloc::string::String,
    #[prost(uint32, tag = "7")]
    pub node_id: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEndpointsResult {
    #[prost(message, repeated, tag = "1")]
    pub endpoints: ::prost::alloc::vec::Vec<EndpointInfo>,
    #[prost(string, tag = "2")]
    pub self_location: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEndpointsResponse {
    #[prost(message, optional, tag = "1")]
    pub operation: ::core::option::Option<Operation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IssueMessage {
    #[prost(string, tag = "3")]
    pub message: ::prost::alloc::string::String,
    #[prost(uint32, tag = "5")]
    pub issue_code: u32,
    #[prost(uint32, tag = "6")]
    pub severity: u32,
    #[prost(message, repeated, tag = "7")]
    pub issues: ::prost::alloc::vec::Vec<IssueMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Operation {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub ready: bool,
    #[prost(enumeration = "StatusCode", tag = "3")]
    pub status: i32,
    #[prost(message, repeated, tag = "4")]
    pub issues: ::prost::alloc::vec::Vec<IssueMessage>,
    #[prost(message, optional, tag = "5")]
    pub result: ::core::option::Option<::prost_types::Any>,
}

/// Server-side operation status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Unspecified = 0,
    Success = 400_000,
    BadRequest = 400_010,
    Unauthorized = 400_020,
    InternalError = 400_030,
    Aborted = 400_040,
    Unavailable = 400_050,
    Overloaded = 400_060,
    SchemeError = 400_070,
    GenericError = 400_080,
    Timeout = 400_090,
    BadSession = 400_100,
    PreconditionFailed = 400_120,
    AlreadyExists = 400_130,
    NotFound = 400_140,
    SessionExpired = 400_150,
    Cancelled = 400_160,
    Undetermined = 400_170,
    Unsupported = 400_180,
    SessionBusy = 400_190,
}
