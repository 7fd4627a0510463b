//! Binds the cancellation-token seam in `shepherd-core` to this crate's
//! concrete async runtime (spec §5: "every operation carries a cancellation
//! token ... workers honor it between steps").

use shepherd_core::provider::Cancellation;
use tokio_util::sync::CancellationToken;

pub struct TokioCancellation(pub CancellationToken);

impl Cancellation for TokioCancellation {
    fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}
