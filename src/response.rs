use bytes::{BufMut, Bytes, BytesMut};

/// Canonical status lines and error prefixes.
pub mod status {
    pub const OK: &str = "OK";
    pub const END: &str = "END";
    pub const STORED: &str = "STORED";
    pub const NOT_STORED: &str = "NOT_STORED";
    pub const EXISTS: &str = "EXISTS";
    pub const DELETED: &str = "DELETED";
    pub const TOUCHED: &str = "TOUCHED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const ERROR: &str = "ERROR ";
    pub const CLIENT_ERROR: &str = "CLIENT_ERROR ";
    pub const SERVER_ERROR: &str = "SERVER_ERROR ";
}

/// One keyed data block of a response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Value {
    pub key: String,
    pub flags: String,
    pub data: Bytes,
    /// Left out of the `VALUE` line when empty.
    pub cas: String,
}

impl Value {
    pub fn new(key: impl Into<String>, flags: impl Into<String>, data: impl Into<Bytes>) -> Value {
        Value {
            key: key.into(),
            flags: flags.into(),
            data: data.into(),
            cas: String::new(),
        }
    }

    pub fn with_cas(mut self, cas: impl Into<String>) -> Value {
        self.cas = cas.into();
        self
    }
}

/// A response before it is written to the wire.
///
/// Values are written in the order they were pushed, then the status line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    pub status: String,
    pub values: Vec<Value>,
}

impl Response {
    pub fn new() -> Response {
        Response::default()
    }

    pub fn with_status(status: impl Into<String>) -> Response {
        Response {
            status: status.into(),
            values: Vec::new(),
        }
    }

    /// `ERROR <description>`
    pub fn error(description: impl AsRef<str>) -> Response {
        Response::with_status(format!("{}{}", status::ERROR, description.as_ref()))
    }

    /// `CLIENT_ERROR <description>`
    pub fn client_error(description: impl AsRef<str>) -> Response {
        Response::with_status(format!("{}{}", status::CLIENT_ERROR, description.as_ref()))
    }

    /// `SERVER_ERROR <description>`
    pub fn server_error(description: impl AsRef<str>) -> Response {
        Response::with_status(format!("{}{}", status::SERVER_ERROR, description.as_ref()))
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Number of bytes `encode` will write.
    pub fn encoded_len(&self) -> usize {
        let values: usize = self
            .values
            .iter()
            .map(|v| {
                // "VALUE " key " " flags " " len [" " cas] "\r\n" data "\r\n"
                let cas = if v.cas.is_empty() { 0 } else { v.cas.len() + 1 };
                6 + v.key.len() + 1 + v.flags.len() + 1 + decimal_len(v.data.len()) + cas + 2 + v.data.len() + 2
            })
            .sum();
        values + self.status.len() + 2
    }

    /// Writes the wire form of the response into `dst`.
    ///
    /// ```text
    /// VALUE <key> <flags> <bytes> [<cas unique>]\r\n
    /// <data block>\r\n
    /// ...
    /// <status>\r\n
    /// ```
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());

        for value in &self.values {
            dst.put_slice(b"VALUE ");
            dst.put_slice(value.key.as_bytes());
            dst.put_u8(b' ');
            dst.put_slice(value.flags.as_bytes());
            dst.put_u8(b' ');
            dst.put_slice(value.data.len().to_string().as_bytes());
            if !value.cas.is_empty() {
                dst.put_u8(b' ');
                dst.put_slice(value.cas.as_bytes());
            }
            dst.put_slice(b"\r\n");
            dst.put_slice(&value.data);
            dst.put_slice(b"\r\n");
        }

        dst.put_slice(self.status.as_bytes());
        dst.put_slice(b"\r\n");
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.freeze()
    }
}

fn decimal_len(mut n: usize) -> usize {
    let mut len = 1;
    while n >= 10 {
        n /= 10;
        len += 1;
    }
    len
}
