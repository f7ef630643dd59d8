mod client;
mod parser;
mod request;

pub use client::{HttpClient, ResponseStream};
pub use parser::{Headers, HttpResponse, Phase, ResponseParser};
pub use request::{HttpRequest, Method};
