use std::{
    io::{self, Read},
    str,
};

use crate::errors::{ErrorKind, RedisError, RedisResult};
use crate::types::Reply;

use combine::{
    any,
    error::StreamError,
    opaque,
    parser::{
        byte::{crlf, take_until_bytes},
        combinator::{any_send_sync_partial_state, AnySendSyncPartialState},
        range::{recognize, take},
    },
    stream::{PointerOffset, RangeStream, StreamErrorFor},
    ParseError, Parser as _,
};

const MAX_RECURSE_DEPTH: usize = 100;

fn reply<'a, I>(
    count: Option<usize>,
) -> impl combine::Parser<I, Output = Reply, PartialState = AnySendSyncPartialState>
where
    I: RangeStream<Token = u8, Range = &'a [u8]>,
    I::Error: combine::ParseError<u8, &'a [u8], I::Position>,
{
    let count = count.unwrap_or(1);

    opaque!(any_send_sync_partial_state(
        any()
            .then_partial(move |&mut b| {
                if b == b'*' && count > MAX_RECURSE_DEPTH {
                    combine::unexpected_any("maximum recursion depth exceeded").left()
                } else {
                    combine::value(b).right()
                }
            })
            .then_partial(move |&mut b| {
                let line = || {
                    recognize(take_until_bytes(&b"\r\n"[..]).with(take(2).map(|_| ()))).and_then(
                        |line: &[u8]| {
                            str::from_utf8(&line[..line.len() - 2])
                                .map_err(StreamErrorFor::<I>::other)
                        },
                    )
                };

                let status = || line().map(|line| Reply::Status(line.to_string()));

                let error = || line().map(|line| Reply::Error(line.to_string()));

                let int = || {
                    line().and_then(|line| {
                        line.trim().parse::<i64>().map_err(|_| {
                            StreamErrorFor::<I>::message_static_message(
                                "expected an integer, got garbage",
                            )
                        })
                    })
                };

                let data = || {
                    int().then_partial(move |size| {
                        if *size < 0 {
                            combine::produce(|| Reply::Nil).left()
                        } else {
                            take(*size as usize)
                                .map(|bs: &[u8]| Reply::Data(bs.to_vec()))
                                .skip(crlf())
                                .right()
                        }
                    })
                };

                let bulk = || {
                    int().then_partial(move |&mut length| {
                        if length < 0 {
                            combine::produce(|| Reply::Nil).left()
                        } else {
                            let length = length as usize;
                            combine::count_min_max(length, length, reply(Some(count + 1)))
                                .map(Reply::Bulk)
                                .right()
                        }
                    })
                };

                combine::dispatch!(b;
                    b'+' => status(),
                    b'-' => error(),
                    b':' => int().map(Reply::Int),
                    b'$' => data(),
                    b'*' => bulk(),
                    b => combine::unexpected_any(combine::error::Token(b))
                )
            })
    ))
}

/// The incremental reply parser.
///
/// More than one reply can be behind the reader, in which case the parser
/// can be invoked multiple times; the stream does not have to be
/// terminated.  This is what makes pipelined reads possible.
pub struct Parser {
    decoder: combine::stream::decoder::Decoder<AnySendSyncPartialState, PointerOffset<[u8]>>,
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new()
    }
}

impl Parser {
    /// Creates a new parser.
    pub fn new() -> Parser {
        Parser {
            decoder: combine::stream::decoder::Decoder::new(),
        }
    }

    /// Parses a single reply from the reader, blocking until one whole
    /// reply is available.
    pub fn parse_value<T: Read>(&mut self, mut reader: T) -> RedisResult<Reply> {
        let mut decoder = &mut self.decoder;
        let result = combine::decode!(decoder, reader, reply(None), |input, _| {
            combine::stream::easy::Stream::from(input)
        });
        match result {
            Err(err) => Err(match err {
                combine::stream::decoder::Error::Io { error, .. } => error.into(),
                combine::stream::decoder::Error::Parse(err) => {
                    if err.is_unexpected_end_of_input() {
                        RedisError::from(io::Error::from(io::ErrorKind::UnexpectedEof))
                    } else {
                        let err = err
                            .map_range(|range| format!("{range:?}"))
                            .map_position(|pos| pos.translate_position(decoder.buffer()))
                            .to_string();
                        RedisError::from((ErrorKind::ParseError, "parse error", err))
                    }
                }
            }),
            Ok(result) => Ok(result),
        }
    }
}

/// Parses bytes into a reply.
///
/// This is the most straightforward way to decode something into a low
/// level reply instead of having to use a whole parser.
pub fn parse_reply(bytes: &[u8]) -> RedisResult<Reply> {
    let mut parser = Parser::new();
    parser.parse_value(bytes)
}
