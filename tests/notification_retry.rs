use greenlight::background::TaskBarrier;
use greenlight::mailer::{MailError, Mailer, Notification, RetryPolicy, SmtpTransport, TokenActivation};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const DELAY: Duration = Duration::from_millis(50);

/// A relay that hangs up on the first `drops` connections and then accepts
/// mail. Every connection time is reported on the channel.
async fn flaky_relay(drops: usize) -> anyhow::Result<(u16, mpsc::UnboundedReceiver<Instant>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut seen = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let _ = tx.send(Instant::now());
            seen += 1;
            if seen <= drops {
                drop(stream);
                continue;
            }

            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let _ = writer.write_all(b"220 relay ready\r\n").await;
            let mut in_data = false;
            while let Ok(Some(line)) = lines.next_line().await {
                let reply: &[u8] = if in_data {
                    if line != "." {
                        continue;
                    }
                    in_data = false;
                    b"250 queued\r\n"
                } else if line == "DATA" {
                    in_data = true;
                    b"354 end with .\r\n"
                } else if line == "QUIT" {
                    let _ = writer.write_all(b"221 bye\r\n").await;
                    break;
                } else {
                    b"250 ok\r\n"
                };
                let _ = writer.write_all(reply).await;
            }
        }
    });

    Ok((port, rx))
}

fn mailer(port: u16) -> Mailer {
    Mailer::new(
        Arc::new(SmtpTransport::new("127.0.0.1", port).with_timeout(Duration::from_secs(2))),
        "Greenlight <no-reply@greenlight.test>",
        RetryPolicy {
            attempts: 3,
            delay: DELAY,
        },
    )
}

fn activation() -> TokenActivation {
    TokenActivation {
        activation_token: "A".repeat(43),
        expires_in: "3 days".to_string(),
    }
}

#[tokio::test]
async fn test_third_attempt_succeeds() -> anyhow::Result<()> {
    let (port, mut connections) = flaky_relay(2).await?;

    mailer(port)
        .send("a@example.com", &activation())
        .await?;

    let mut times = Vec::new();
    while let Ok(t) = connections.try_recv() {
        times.push(t);
    }
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= DELAY);
    }
    Ok(())
}

#[tokio::test]
async fn test_gives_up_after_third_failure() -> anyhow::Result<()> {
    let (port, mut connections) = flaky_relay(usize::MAX).await?;

    let err = mailer(port)
        .send("a@example.com", &activation())
        .await
        .unwrap_err();
    assert!(matches!(err, MailError::Delivery { attempts: 3, .. }));

    let mut count = 0;
    while connections.try_recv().is_ok() {
        count += 1;
    }
    assert_eq!(count, 3);
    Ok(())
}

#[tokio::test]
async fn test_dispatch_does_not_block_caller() -> anyhow::Result<()> {
    let (port, _connections) = flaky_relay(usize::MAX).await?;
    let barrier = TaskBarrier::new();

    let started = Instant::now();
    mailer(port).dispatch(
        &barrier,
        Notification::new("a@example.com", activation()),
    );
    assert!(started.elapsed() < DELAY);
    assert_eq!(barrier.in_flight(), 1);

    assert!(barrier.drain(Duration::from_secs(5)).await);
    Ok(())
}
