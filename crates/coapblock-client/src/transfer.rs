//! Block-wise upload driver.
//!
//! One transfer owns a queue of blocks and sends them strictly one at a
//! time: block i+1 goes out only after the response to block i has been
//! read. The loop ends on the first terminal outcome.
//!
//!   Idle ──split──▶ Sending(0) ──2.31──▶ Sending(1) ──2.31──▶ … ──2.01/2.04──▶ Succeeded
//!                        │                    │
//!                        └──── other code / timeout / transport error ────▶ Failed

use std::collections::VecDeque;

use bytes::Bytes;

use coapblock_core::{split, BlockSize, Code, Request, Response};

use crate::error::ClientError;
use crate::transport::Transport;

/// What a response code means to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockReply {
    /// 2.31 — intermediate block accepted.
    Continue,
    /// 2.01
    Created,
    /// 2.04
    Changed,
    Unrecognized,
}

impl BlockReply {
    fn classify(code: Code) -> Self {
        match code {
            Code::CONTINUE => BlockReply::Continue,
            Code::CREATED => BlockReply::Created,
            Code::CHANGED => BlockReply::Changed,
            _ => BlockReply::Unrecognized,
        }
    }
}

/// A single Block1 upload. `template` supplies destination, method,
/// confirmability and content format; each block adds its own Block1 value
/// and bytes.
pub struct BlockwiseTransfer<'a, T> {
    transport: &'a T,
    template: Request,
    payload: Bytes,
    block_size: BlockSize,
}

impl<'a, T: Transport> BlockwiseTransfer<'a, T> {
    pub fn new(transport: &'a T, template: Request, payload: Bytes, block_size: BlockSize) -> Self {
        Self {
            transport,
            template,
            payload,
            block_size,
        }
    }

    /// Drive the transfer to completion.
    ///
    /// A terminal success code is honoured on any block, as servers are
    /// allowed to finish early. Remaining blocks are then left unsent and
    /// a warning is logged.
    pub async fn run(self) -> Result<Response, ClientError> {
        let mut queue: VecDeque<_> = split(&self.payload, self.block_size).into();
        let total = queue.len();

        tracing::debug!(
            destination = %self.template.destination,
            bytes = self.payload.len(),
            blocks = total,
            block_size = self.block_size.bytes(),
            "starting block-wise transfer"
        );

        loop {
            let Some(block) = queue.pop_front() else {
                return Err(ClientError::NoBlocks);
            };

            let request = self.template.for_block(&block, &self.payload)?;
            let response = self.transport.send(request).await.map_err(|e| {
                tracing::warn!(index = block.index, error = %e, "block send failed");
                ClientError::from(e)
            })?;

            match BlockReply::classify(response.code) {
                BlockReply::Continue => {
                    tracing::trace!(index = block.index, len = block.data.len(), "block accepted");
                }
                BlockReply::Created | BlockReply::Changed => {
                    if !queue.is_empty() {
                        tracing::warn!(
                            index = block.index,
                            unsent = queue.len(),
                            code = %response.code,
                            "server finished transfer before the last block"
                        );
                    }
                    tracing::debug!(
                        blocks_sent = block.index + 1,
                        code = %response.code,
                        "block-wise transfer complete"
                    );
                    return Ok(response);
                }
                BlockReply::Unrecognized => {
                    tracing::warn!(
                        index = block.index,
                        code = %response.code,
                        "block rejected"
                    );
                    return Err(ClientError::Rejected(response));
                }
            }
        }
    }
}
