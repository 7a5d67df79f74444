//! Server replies.
//!
//! A successful reply carries its result tuples under the `DATA` body key.
//! Error replies set [`code::ERROR_FLAG`] in the header code and carry the
//! message under the `ERROR` key; they are turned into [`Error::Server`].

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;

use crate::codec::{
    read_map_len, read_string, read_uint, read_value, write_array, write_array_len, write_map_len,
    write_str, write_uint, MsgPackCodec, Value,
};
use crate::error::{CodecError, CodecResult, Error};
use crate::protocol::{begin_frame, code, finish_frame, key, Frame, Header};

/// One result tuple.
pub type Row = Vec<Value>;

/// Empty MsgPack array, the data section of a reply without `DATA`.
const EMPTY_DATA: &[u8] = &[0x90];

/// Decoded rows of a successful reply.
///
/// Owned by the caller; the raw data section is kept for
/// [`Reply::decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    rows: Vec<Row>,
    data: Bytes,
    schema_version: Option<u64>,
}

impl Reply {
    /// Build a reply from rows (used when serving replies).
    pub fn from_rows(rows: Vec<Row>) -> CodecResult<Self> {
        let mut wr = BytesMut::new().writer();
        write_rows(&mut wr, &rows)?;
        Ok(Self {
            rows,
            data: wr.into_inner().freeze(),
            schema_version: None,
        })
    }

    /// Decode the body of a non-error response frame.
    ///
    /// A missing `DATA` key yields no rows. Entries that are not arrays,
    /// as returned by functions called with 1.7 semantics, become
    /// single-value rows.
    pub fn unpack(frame: &Frame) -> CodecResult<Self> {
        let body = frame.body();
        let mut data = Bytes::from_static(EMPTY_DATA);
        let mut rows = Vec::new();

        if !body.is_empty() {
            let mut rd = body;
            let count = read_map_len(&mut rd)?;
            for _ in 0..count {
                let field = read_uint(&mut rd)?;
                let start = body.len() - rd.len();
                let value = read_value(&mut rd)?;
                if field != key::DATA {
                    continue;
                }

                let end = body.len() - rd.len();
                data = frame.body.slice(start..end);
                rows = match value {
                    Value::Array(entries) => entries.into_iter().map(into_row).collect(),
                    Value::Nil => Vec::new(),
                    other => {
                        return Err(CodecError::malformed(format!(
                            "reply data is not an array: {:?}",
                            other
                        )))
                    }
                };
            }
        }

        Ok(Self {
            rows,
            data,
            schema_version: frame.header.schema_version,
        })
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Schema version the server reported, if any.
    pub fn schema_version(&self) -> Option<u64> {
        self.schema_version
    }

    /// Decode the data section into a user type.
    ///
    /// Rows are positional, so a `Vec<(u64, String)>` or a `Vec` of structs
    /// deserialized from arrays both work.
    pub fn decode<T: DeserializeOwned>(&self) -> CodecResult<T> {
        MsgPackCodec::decode(&self.data)
    }

    /// Append an OK response frame carrying these rows.
    pub fn pack(&self, sync: u64, buf: &mut BytesMut) -> CodecResult<()> {
        let start = begin_frame(buf);
        {
            let mut wr = (&mut *buf).writer();
            let mut header = Header::new(code::OK, sync);
            if let Some(version) = self.schema_version {
                header = header.with_schema_version(version);
            }
            header.encode_into(&mut wr)?;
            write_map_len(&mut wr, 1)?;
            write_uint(&mut wr, key::DATA)?;
            write_rows(&mut wr, &self.rows)?;
        }
        finish_frame(buf, start).map(|_| ())
    }
}

impl IntoIterator for Reply {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a Reply {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

fn into_row(entry: Value) -> Row {
    match entry {
        Value::Array(fields) => fields,
        scalar => vec![scalar],
    }
}

fn write_rows<W: std::io::Write>(wr: &mut W, rows: &[Row]) -> CodecResult<()> {
    write_array_len(wr, rows.len())?;
    for row in rows {
        write_array(wr, row)?;
    }
    Ok(())
}

/// Decode an error response frame into [`Error::Server`].
pub fn server_error(frame: &Frame) -> CodecResult<Error> {
    let body = frame.body();
    let mut message = None;

    if !body.is_empty() {
        let mut rd = body;
        let count = read_map_len(&mut rd)?;
        for _ in 0..count {
            if read_uint(&mut rd)? == key::ERROR {
                message = Some(read_string(&mut rd)?);
            } else {
                read_value(&mut rd)?;
            }
        }
    }

    Ok(Error::Server {
        code: frame.header.error_code(),
        message: message.unwrap_or_else(|| "unknown error".to_string()),
    })
}

/// Append an error response frame.
pub fn pack_error(sync: u64, errcode: u32, message: &str, buf: &mut BytesMut) -> CodecResult<()> {
    let start = begin_frame(buf);
    {
        let mut wr = (&mut *buf).writer();
        Header::new(code::ERROR_FLAG | errcode, sync).encode_into(&mut wr)?;
        write_map_len(&mut wr, 1)?;
        write_uint(&mut wr, key::ERROR)?;
        write_str(&mut wr, message)?;
    }
    finish_frame(buf, start).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::unpack_frame;
    use serde::Deserialize;

    fn dataset() -> Vec<Row> {
        vec![
            vec![Value::Unsigned(1), Value::from("First record")],
            vec![Value::Unsigned(2), Value::from("Music")],
            vec![Value::Unsigned(3), Value::from("Length"), Value::Unsigned(93)],
        ]
    }

    fn frame_with_body(code: u32, body: &[u8]) -> Frame {
        let mut buf = BytesMut::new();
        let start = begin_frame(&mut buf);
        let mut header = Vec::new();
        Header::new(code, 5).encode_into(&mut header).unwrap();
        buf.extend_from_slice(&header);
        buf.extend_from_slice(body);
        finish_frame(&mut buf, start).unwrap();
        unpack_frame(&buf).unwrap().0
    }

    #[test]
    fn test_pack_unpack_rows() {
        let reply = Reply::from_rows(dataset()).unwrap();
        let mut buf = BytesMut::new();
        reply.pack(5, &mut buf).unwrap();

        let (frame, _) = unpack_frame(&buf).unwrap();
        assert_eq!(frame.sync(), 5);
        let decoded = Reply::unpack(&frame).unwrap();
        assert_eq!(decoded.rows(), dataset().as_slice());
        assert_eq!(decoded.rows()[2][2], Value::Unsigned(93));
    }

    #[test]
    fn test_missing_data_is_empty() {
        let reply = Reply::unpack(&frame_with_body(code::OK, &[])).unwrap();
        assert!(reply.is_empty());

        // {0x05: 1} without DATA
        let reply = Reply::unpack(&frame_with_body(code::OK, &[0x81, 0x05, 0x01])).unwrap();
        assert!(reply.is_empty());
        let rows: Vec<Vec<u64>> = reply.decode().unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_scalar_entries_become_rows() {
        // {0x30: [7, "x"]}
        let frame = frame_with_body(code::OK, &[0x81, 0x30, 0x92, 0x07, 0xa1, b'x']);
        let reply = Reply::unpack(&frame).unwrap();
        assert_eq!(
            reply.into_rows(),
            vec![vec![Value::Unsigned(7)], vec![Value::from("x")]]
        );
    }

    #[test]
    fn test_data_not_array_is_malformed() {
        let frame = frame_with_body(code::OK, &[0x81, 0x30, 0x07]);
        assert!(matches!(
            Reply::unpack(&frame),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_typed_decode() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Record {
            id: u64,
            name: String,
            #[serde(default)]
            length: Option<u64>,
        }

        let reply = Reply::from_rows(dataset()).unwrap();
        let records: Vec<Record> = reply.decode().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].name, "Music");
        assert_eq!(records[2].length, Some(93));
        assert_eq!(records[0].length, None);
    }

    #[test]
    fn test_server_error() {
        let mut buf = BytesMut::new();
        pack_error(9, 0x21, "Procedure 'nope' is not defined", &mut buf).unwrap();
        let (frame, _) = unpack_frame(&buf).unwrap();
        assert!(frame.is_error());

        match server_error(&frame).unwrap() {
            Error::Server { code, message } => {
                assert_eq!(code, 0x21);
                assert_eq!(message, "Procedure 'nope' is not defined");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_server_error_without_message() {
        let frame = frame_with_body(code::ERROR_FLAG | 3, &[]);
        let err = server_error(&frame).unwrap();
        assert_eq!(err.to_string(), "server error 3: unknown error");
    }
}
