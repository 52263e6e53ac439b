//! End-to-end: a listener accepts one connection and echoes back
//! whatever the client sends, entirely through the public `greenloop`
//! surface (no `greenloop_core` internals).

use greenloop::{spawn, TcpListener, TcpStream};

#[test]
fn tiny_echo_roundtrip() {
    let _ = env_logger::try_init();

    greenloop::block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = spawn(async move {
            let (stream, _peer) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                stream.write(&buf[..n]).await.unwrap();
            }
        });

        let client = TcpStream::connect(addr).await.unwrap();
        client.write(b"ping").await.unwrap();
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        client.close();
        let _ = server.wait().await;
    });
}
