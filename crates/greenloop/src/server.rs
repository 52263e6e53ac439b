//! `serve`/`StopServe`: the accept-loop driver, modeled on `guv.green.baseserver`.
//!
//! `serve` owns the listening socket and hands each accepted connection to
//! a handler running in its own task, bounded by a [`GreenPool`]. The
//! handler signals the loop to stop by returning [`GreenError::StopServe`]
//! — any other error from `accept()` itself also ends the loop, but a
//! handler's error only ends its own connection unless it's `StopServe`.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;
use std::rc::Rc;
use std::task::Poll;

use greenloop_core::GreenError;

use crate::pool::GreenPool;
use crate::socket::TcpStream;
use crate::sync::TEvent;
use crate::TcpListener;

/// Accept connections on `listener` forever, spawning `handler(stream, addr)`
/// for each one through `pool`. Returns when a handler raises
/// [`GreenError::StopServe`] or `accept()` itself fails.
pub async fn serve<F, Fut>(listener: TcpListener, pool: GreenPool, handler: F) -> Result<(), GreenError>
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Clone + 'static,
    Fut: Future<Output = Result<(), GreenError>> + 'static,
{
    let stop = Rc::new(TEvent::new());

    loop {
        let accepted = {
            let mut accept_fut = pin!(listener.accept());
            let mut stop_fut = pin!(stop.wait(None));
            std::future::poll_fn(|cx| {
                if let Poll::Ready(r) = accept_fut.as_mut().poll(cx) {
                    return Poll::Ready(Some(r));
                }
                if stop_fut.as_mut().poll(cx).is_ready() {
                    return Poll::Ready(None);
                }
                Poll::Pending
            })
            .await
        };

        let (stream, peer) = match accepted {
            Some(r) => r?,
            None => return Err(GreenError::StopServe),
        };

        let handler = handler.clone();
        let stop_for_link = stop.clone();

        let task = pool
            .spawn(async move {
                match handler(stream, peer).await {
                    Ok(()) => None,
                    Err(e) => Some(e),
                }
            })
            .await?;

        // A handler's `StopServe` ends the whole loop, same as
        // `baseserver.py` treating it as a sentinel rather than a normal
        // per-connection failure; any other handler error is logged and
        // the loop keeps accepting.
        task.link(move |outcome: &Option<GreenError>| {
            if let Some(GreenError::StopServe) = outcome {
                log::info!("handler requested server stop");
                stop_for_link.set();
            } else if let Some(e) = outcome {
                log::warn!("connection handler failed: {e}");
            }
        });
    }
}

/// Bind and serve in one call, mirroring `guv.green.baseserver.serve`'s
/// usual invocation shape.
pub async fn listen_and_serve<F, Fut>(
    addr: SocketAddr,
    pool_size: usize,
    handler: F,
) -> Result<(), GreenError>
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Clone + 'static,
    Fut: Future<Output = Result<(), GreenError>> + 'static,
{
    let listener = TcpListener::bind(addr).map_err(GreenError::Io)?;
    let pool = GreenPool::new(pool_size);
    serve(listener, pool, handler).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TcpStream as ClientStream;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn serve_handles_one_connection_then_stops() {
        greenloop_core::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
            let addr = listener.local_addr().unwrap();
            let pool = GreenPool::new(4);

            let handled = Rc::new(Cell::new(false));
            let handled2 = handled.clone();

            let server_task = greenloop_core::spawn(async move {
                serve(listener, pool, move |stream, _peer| {
                    let handled3 = handled2.clone();
                    async move {
                        let mut buf = [0u8; 4];
                        let n = stream.read(&mut buf).await?;
                        stream.write(&buf[..n]).await?;
                        handled3.set(true);
                        Err(GreenError::StopServe)
                    }
                })
                .await
            });

            let client = ClientStream::connect(addr).await.unwrap();
            client.write(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"ping");

            let result = server_task.wait().await;
            assert!(matches!(*result, Err(GreenError::StopServe)));
            assert!(handled.get());
        });
    }
}
