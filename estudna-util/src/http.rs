pub use client::{Client, ClientError, HeaderMap, Headers, Method, Query, StatusCode};
pub use uri::{InvalidUriError, Uri};

mod uri {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub struct InvalidUriError(String);

    impl Display for InvalidUriError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            self.0.fmt(f)
        }
    }

    impl From<http::uri::InvalidUri> for InvalidUriError {
        fn from(value: http::uri::InvalidUri) -> Self {
            InvalidUriError(value.to_string())
        }
    }

    impl From<http::uri::InvalidUriParts> for InvalidUriError {
        fn from(value: http::uri::InvalidUriParts) -> Self {
            InvalidUriError(value.to_string())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct Uri(http::Uri);

    impl Uri {
        pub fn new(uri: http::Uri) -> Self {
            Self(uri)
        }

        pub fn from_static(src: &'static str) -> Self {
            Self(http::Uri::from_static(src))
        }

        /// Replace the path and query of `base_uri`.
        ///
        /// Any path already present on the base is discarded, callers pass
        /// the full path of the resource.
        pub fn from_parts(
            base_uri: Uri,
            path: &str,
            query: Option<&str>,
        ) -> Result<Self, InvalidUriError> {
            let path_and_query = if let Some(qs) = query {
                http::uri::PathAndQuery::from_maybe_shared(format!("{path}?{qs}"))?
            } else {
                http::uri::PathAndQuery::from_str(path)?
            };
            let mut parts = base_uri.0.into_parts();
            parts.path_and_query = Some(path_and_query);

            Ok(http::Uri::from_parts(parts).map(Self::new)?)
        }
    }

    impl Display for Uri {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            self.0.fmt(f)
        }
    }

    impl FromStr for Uri {
        type Err = InvalidUriError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Ok(http::Uri::from_str(s).map(Self::new)?)
        }
    }

    impl From<http::Uri> for Uri {
        fn from(value: http::Uri) -> Self {
            Self(value)
        }
    }

    impl Serialize for Uri {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            serializer.serialize_str(&self.to_string())
        }
    }

    impl<'de> Deserialize<'de> for Uri {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        }
    }
}

mod client {
    use std::collections::HashMap;
    use std::convert::TryInto;
    use std::time::Duration;

    use reqwest::RequestBuilder;
    use reqwest::header::{ACCEPT, CONTENT_TYPE};
    use serde::Serialize;
    use serde::de::DeserializeOwned;

    use super::uri::Uri;

    pub type Method = reqwest::Method;
    pub type StatusCode = reqwest::StatusCode;
    pub type HeaderMap = reqwest::header::HeaderMap;
    pub type Headers = HashMap<String, String>;
    pub type Query = [(String, String)];

    #[derive(Debug, thiserror::Error)]
    pub enum ClientError {
        #[error("failed to build request: {0}")]
        Request(String),

        #[error("server replied with status: {0}")]
        Response(StatusCode),

        #[error(transparent)]
        Client(reqwest::Error),

        #[error(transparent)]
        Server(reqwest::Error),
    }

    impl ClientError {
        /// The status code returned by the server, if the request got that far
        pub fn status(&self) -> Option<StatusCode> {
            match self {
                ClientError::Response(status) => Some(*status),
                _ => None,
            }
        }
    }

    /// JSON-over-HTTP client reusing a single connection pool.
    #[derive(Debug, Clone)]
    pub struct Client {
        client: reqwest::Client,
        timeout: Option<Duration>,
    }

    impl Default for Client {
        /// Default client with a timeout of 10 seconds.
        fn default() -> Self {
            Self::new(Some(Duration::from_secs(10)))
        }
    }

    impl Client {
        pub fn new(timeout: Option<Duration>) -> Self {
            Self {
                client: reqwest::Client::new(),
                timeout,
            }
        }

        pub async fn get<Response>(
            &self,
            uri: &Uri,
            query: Option<&Query>,
            headers: Option<&Headers>,
        ) -> Result<Response, ClientError>
        where
            Response: DeserializeOwned,
        {
            self.send::<(), Response>(Method::GET, uri, query, headers, None)
                .await
        }

        pub async fn post<Payload, Response>(
            &self,
            uri: &Uri,
            headers: Option<&Headers>,
            payload: &Payload,
        ) -> Result<Response, ClientError>
        where
            Payload: Serialize + ?Sized,
            Response: DeserializeOwned,
        {
            self.send(Method::POST, uri, None, headers, Some(payload))
                .await
        }

        /// Send a JSON request and decode the JSON reply.
        ///
        /// Any non-2xx status is turned into [ClientError::Response].
        pub async fn send<Payload, Response>(
            &self,
            method: Method,
            uri: &Uri,
            query: Option<&Query>,
            headers: Option<&Headers>,
            payload: Option<&Payload>,
        ) -> Result<Response, ClientError>
        where
            Payload: Serialize + ?Sized,
            Response: DeserializeOwned,
        {
            let res = self
                .request(method, uri, |req| {
                    let headers = headers
                        .map(into_header_map)
                        .unwrap_or(Ok(HeaderMap::new()))?;
                    let mut req = req
                        .header(CONTENT_TYPE, "application/json")
                        .header(ACCEPT, "application/json")
                        .headers(headers);
                    if let Some(query) = query {
                        req = req.query(query);
                    }
                    if let Some(payload) = payload {
                        req = req.json(payload);
                    }
                    Ok(req)
                })
                .await?;

            wrap_status_error(res)?
                .json()
                .await
                .map_err(ClientError::Server)
        }

        /// Thin wrapper around [reqwest::Request], this is your gateway to
        /// a fully customizable client if this type's methods won't do.
        pub async fn request<D>(
            &self,
            method: Method,
            uri: &Uri,
            decorator: D,
        ) -> Result<reqwest::Response, ClientError>
        where
            D: FnOnce(RequestBuilder) -> Result<RequestBuilder, ClientError>,
        {
            let mut request = self.client.request(method, uri.to_string());

            if let Some(timeout) = self.timeout {
                request = request.timeout(timeout);
            }

            request = decorator(request)?;

            request.send().await.map_err(ClientError::Client)
        }
    }

    /// Convert headers into a [HeaderMap].
    ///
    /// This will return a [ClientError] for any non-ASCII keys or values.
    fn into_header_map(headers: &Headers) -> Result<HeaderMap, ClientError> {
        headers
            .try_into()
            .map_err(|err: http::Error| ClientError::Request(err.to_string()))
    }

    fn wrap_status_error(res: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        match res.status() {
            status if status.is_success() => Ok(res),
            status => Err(ClientError::Response(status)),
        }
    }
}
