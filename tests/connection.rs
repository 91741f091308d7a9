use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};

use pipedis::connection::Connection;
use pipedis::Reply;

async fn create_tcp_connection() -> Result<(UnboundedSender<Vec<u8>>, TcpStream), std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let local_addr = listener.local_addr()?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            while let Some(data) = rx.recv().await {
                // Write the received channel data to the socket.
                if socket.write_all(&data).await.is_err() {
                    break;
                }
            }
        }
    });

    // Connect to the server as a client to complete the setup.
    let stream = TcpStream::connect(local_addr).await?;

    Ok((tx, stream))
}

#[tokio::test]
async fn test_read_status() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream);

    tcp_stream_tx.send(b"+OK\r\n".to_vec()).unwrap();

    let actual = connection.read_reply().await.unwrap();
    let expected = Some(Reply::Status("OK".to_string()));

    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_read_bulk_string() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream);

    tcp_stream_tx.send(b"$5\r\nhello\r\n".to_vec()).unwrap();

    let actual = connection.read_reply().await.unwrap();
    let expected = Some(Reply::Bulk(Some(Bytes::from("hello"))));

    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_read_null_bulk_string() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream);

    tcp_stream_tx.send(b"$-1\r\n".to_vec()).unwrap();

    let actual = connection.read_reply().await.unwrap();
    let expected = Some(Reply::Bulk(None));

    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_read_array() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream);

    tcp_stream_tx
        .send(b"*3\r\n$3\r\nfoo\r\n$-1\r\n:42\r\n".to_vec())
        .unwrap();

    let actual = connection.read_reply().await.unwrap();
    let expected = Some(Reply::Array(Some(vec![
        Reply::Bulk(Some(Bytes::from("foo"))),
        Reply::Bulk(None),
        Reply::Integer(42),
    ])));

    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_read_null_array() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream);

    tcp_stream_tx.send(b"*-1\r\n".to_vec()).unwrap();

    let actual = connection.read_reply().await.unwrap();

    assert_eq!(actual, Some(Reply::Array(None)));
}

#[tokio::test]
async fn test_read_error() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream);

    tcp_stream_tx.send(b"-ERR unknown command\r\n".to_vec()).unwrap();

    let actual = connection.read_reply().await.unwrap();
    let expected = Some(Reply::Error(Bytes::from("ERR unknown command")));

    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_read_multiple_replies_sequentially() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream);

    // Everything in a single write: the replies arrive in one read.
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"+OK\r\n");
    bytes.extend_from_slice(b"$5\r\nhello\r\n");
    bytes.extend_from_slice(b"*2\r\n$7\r\nmykey_1\r\n$9\r\nmyvalue_1\r\n");
    bytes.extend_from_slice(b"-Error message\r\n");
    bytes.extend_from_slice(b":1000\r\n");
    tcp_stream_tx.send(bytes).unwrap();

    // Status.
    let actual = connection.read_reply().await.unwrap();
    assert_eq!(actual, Some(Reply::Status("OK".to_string())));

    // Bulk string.
    let actual = connection.read_reply().await.unwrap();
    assert_eq!(actual, Some(Reply::Bulk(Some(Bytes::from("hello")))));

    // Array.
    let actual = connection.read_reply().await.unwrap();
    let expected = Some(Reply::Array(Some(vec![
        Reply::Bulk(Some(Bytes::from("mykey_1"))),
        Reply::Bulk(Some(Bytes::from("myvalue_1"))),
    ])));
    assert_eq!(actual, expected);

    // Error.
    let actual = connection.read_reply().await.unwrap();
    assert_eq!(actual, Some(Reply::Error(Bytes::from("Error message"))));

    // Integer.
    let actual = connection.read_reply().await.unwrap();
    assert_eq!(actual, Some(Reply::Integer(1000)));
}

#[tokio::test]
async fn test_read_incomplete_reply() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream);

    // "*3\r\n$3\r\nSET\r\n$5\r\nmykey\r\n$7\r\nmyvalue\r\n" split into parts, one of them
    // between the CR and the LF of a line.
    let part1 = b"*3\r\n$3\r\nSE";
    let part2 = b"T\r\n$5\r\nmykey\r";
    let part3 = b"\n$7\r\nmyvalue\r\n";

    tokio::spawn(async move {
        let parts = vec![part1.to_vec(), part2.to_vec(), part3.to_vec()];
        for part in parts {
            tcp_stream_tx.send(part).unwrap();
            // Simulate a delay in sending/receiving the data.
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    });

    let actual = connection.read_reply().await.unwrap();
    let expected = Some(Reply::Array(Some(vec![
        Reply::Bulk(Some(Bytes::from("SET"))),
        Reply::Bulk(Some(Bytes::from("mykey"))),
        Reply::Bulk(Some(Bytes::from("myvalue"))),
    ])));
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_server_closing_the_connection() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream);

    tcp_stream_tx.send(b":1\r\n".to_vec()).unwrap();
    drop(tcp_stream_tx);

    assert_eq!(connection.read_reply().await.unwrap(), Some(Reply::Integer(1)));
    assert_eq!(connection.read_reply().await.unwrap(), None);
}

#[tokio::test]
async fn test_server_closing_mid_reply_is_an_error() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream);

    tcp_stream_tx.send(b"$10\r\nhel".to_vec()).unwrap();
    drop(tcp_stream_tx);

    assert!(connection.read_reply().await.is_err());
}

#[tokio::test]
async fn test_write_all_reaches_the_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local_addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = vec![0u8; 14];
        socket.read_exact(&mut received).await.unwrap();
        received
    });

    let mut connection = Connection::new(TcpStream::connect(local_addr).await.unwrap());
    connection.write_all(b"*1\r\n$4\r\nping\r\n").await.unwrap();

    assert_eq!(server.await.unwrap(), b"*1\r\n$4\r\nping\r\n".to_vec());
}
