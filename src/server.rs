use std::io;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::limits::MAX_LINE_LEN;
use crate::scheduler::Scheduler;
use crate::session::{Reply, Session, GOODBYE};

/// Run one interactive session over `socket` until the client quits,
/// hangs up, or sends something we refuse to read.
pub async fn process_connection(socket: TcpStream, scheduler: Arc<Scheduler>) -> io::Result<()> {
    let (read, mut write) = socket.into_split();
    let mut lines = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let mut session = Session::new(scheduler);

    write.write_all(session.greeting().as_bytes()).await?;
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("line longer than {MAX_LINE_LEN} bytes, closing session");
                write.write_all(GOODBYE.as_bytes()).await?;
                break;
            }
            // non-UTF-8 input (e.g. telnet option negotiation) ends up here too
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                warn!("unreadable input, closing session: {e}");
                write.write_all(GOODBYE.as_bytes()).await?;
                break;
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        match session.handle_line(&line).await {
            Reply::Continue(text) => write.write_all(text.as_bytes()).await?,
            Reply::Close(text) => {
                write.write_all(text.as_bytes()).await?;
                break;
            }
        }
    }
    debug!("session ended in state {:?}", session.state());
    let _ = write.shutdown().await;
    Ok(())
}
