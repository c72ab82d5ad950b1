//! JSON and query-string codecs layered on top of the transports.

mod json;
mod query;

pub use json::{
    decode_body, encode_body, json_request, parse, request_http_json, request_ws_json,
    JsonHttpResponse, JsonMessage, JsonWsResponse, ParseError,
};
pub use query::{
    encode_query, encode_query_multi, encode_query_multi_raw, encode_query_raw, QueryValue,
};
