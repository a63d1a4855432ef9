use byteorder::{BigEndian, ByteOrder};

use crate::{
    backend::TransferResult,
    config::{
        RequestDownloadConfig, RequestTransferExitConfig, RequestUploadConfig, TransferDataConfig,
    },
    context::{DiagnosticContext, MsgContext, TransferPhase},
    services::{Handled, ServiceResult},
    NegativeResponseCode,
};

/// `lengthFormatIdentifier` of the RequestDownload/Upload response: the
/// maxNumberOfBlockLength is reported in two bytes.
const BLOCK_LENGTH_FORMAT: u8 = 0x20;

/// Parsed `dataFormatIdentifier, addressAndLengthFormatIdentifier,
/// memoryAddress, memorySize` preamble shared by 0x34 and 0x35.
#[derive(Debug)]
struct MemoryWindow {
    data_format_identifier: u8,
    address: u32,
    size: u32,
}

fn parse_window(request: &[u8]) -> Result<MemoryWindow, NegativeResponseCode> {
    if request.len() < 4 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    let data_format_identifier = request[0];
    let size_len = usize::from(request[1] >> 4);
    let addr_len = usize::from(request[1] & 0x0F);
    if !(1..=4).contains(&size_len) || !(1..=4).contains(&addr_len) {
        return Err(NegativeResponseCode::RequestOutOfRange);
    }
    if request.len() != 2 + addr_len + size_len {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    let mut address = 0u32;
    for byte in &request[2..2 + addr_len] {
        address = (address << 8) | u32::from(*byte);
    }
    let mut size = 0u32;
    for byte in &request[2 + addr_len..] {
        size = (size << 8) | u32::from(*byte);
    }
    Ok(MemoryWindow { data_format_identifier, address, size })
}

fn accept_window(
    process: &mut crate::config::MemoryWindowFn,
    phase: TransferPhase,
    rx_buffer_size: usize,
    ctx: &mut DiagnosticContext,
    msg: &mut MsgContext<'_>,
) -> ServiceResult {
    let window = parse_window(msg.request)?;
    if ctx.transfer.phase != TransferPhase::Idle {
        return Err(NegativeResponseCode::RequestSequenceError);
    }

    // the transport's receive buffer bounds the block length unless the
    // integrator lowers it further
    let mut block_len = rx_buffer_size as u32;
    process(
        ctx.op_status(),
        window.data_format_identifier,
        window.address,
        window.size,
        &mut block_len,
    )?;
    tracing::debug!(address = window.address, size = window.size, ?phase, "transfer window accepted");

    msg.response[0] = BLOCK_LENGTH_FORMAT;
    BigEndian::write_u16(&mut msg.response[1..3], block_len.min(u32::from(u16::MAX)) as u16);
    msg.response_len = 3;
    ctx.transfer.begin(phase, window.address, window.size);
    Ok(Handled::Done)
}

/// RequestDownload (0x34): opens a tester-to-ECU window.
pub(crate) fn request_download(
    cfg: &mut RequestDownloadConfig,
    rx_buffer_size: usize,
    ctx: &mut DiagnosticContext,
    msg: &mut MsgContext<'_>,
) -> ServiceResult {
    accept_window(&mut cfg.process, TransferPhase::Download, rx_buffer_size, ctx, msg)
}

/// RequestUpload (0x35): opens an ECU-to-tester window.
pub(crate) fn request_upload(
    cfg: &mut RequestUploadConfig,
    rx_buffer_size: usize,
    ctx: &mut DiagnosticContext,
    msg: &mut MsgContext<'_>,
) -> ServiceResult {
    accept_window(&mut cfg.process, TransferPhase::Upload, rx_buffer_size, ctx, msg)
}

/// TransferData (0x36): one block of the active window.
pub(crate) fn transfer_data(
    cfg: &mut TransferDataConfig,
    ctx: &mut DiagnosticContext,
    msg: &mut MsgContext<'_>,
) -> ServiceResult {
    if msg.request.is_empty() {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    if ctx.transfer.phase == TransferPhase::Idle {
        return Err(NegativeResponseCode::RequestSequenceError);
    }
    if msg.request[0] != ctx.transfer.block_sequence_counter {
        return Err(NegativeResponseCode::WrongBlockSequenceCounter);
    }

    let address = ctx.transfer.memory_address + ctx.transfer.offset;
    let remaining = ctx.transfer.memory_size - ctx.transfer.offset;

    match ctx.transfer.phase {
        TransferPhase::Download => {
            let Some(write) = cfg.write.as_mut() else {
                return Err(NegativeResponseCode::ConditionsNotCorrect);
            };
            let data = &msg.request[1..];
            if remaining < data.len() as u32 {
                return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
            }
            match write(ctx.op_status(), address, data) {
                TransferResult::Ok => {
                    ctx.transfer.offset += data.len() as u32;
                    msg.response[0] = ctx.transfer.block_sequence_counter;
                    msg.response_len = 1;
                    ctx.transfer.block_sequence_counter =
                        ctx.transfer.block_sequence_counter.wrapping_add(1);
                    Ok(Handled::Done)
                }
                TransferResult::Pending => Ok(Handled::Pending),
                TransferResult::ForceRcrrp => Ok(Handled::ForceRcrrp),
                TransferResult::Failed(nrc) => {
                    Err(nrc.unwrap_or(NegativeResponseCode::GeneralProgrammingFailure))
                }
            }
        }
        TransferPhase::Upload => {
            let Some(read) = cfg.read.as_mut() else {
                return Err(NegativeResponseCode::ConditionsNotCorrect);
            };
            if msg.request.len() != 1 {
                return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
            }
            let chunk = remaining.min((msg.capacity() - 1) as u32) as usize;
            let (head, payload) = msg.response.split_at_mut(1);
            match read(ctx.op_status(), address, &mut payload[..chunk]) {
                TransferResult::Ok => {
                    ctx.transfer.offset += chunk as u32;
                    head[0] = ctx.transfer.block_sequence_counter;
                    msg.response_len = 1 + chunk;
                    ctx.transfer.block_sequence_counter =
                        ctx.transfer.block_sequence_counter.wrapping_add(1);
                    Ok(Handled::Done)
                }
                TransferResult::Pending => Ok(Handled::Pending),
                TransferResult::ForceRcrrp => Ok(Handled::ForceRcrrp),
                TransferResult::Failed(nrc) => {
                    Err(nrc.unwrap_or(NegativeResponseCode::ConditionsNotCorrect))
                }
            }
        }
        TransferPhase::Idle => unreachable!("idle state rejected above"),
    }
}

/// RequestTransferExit (0x37): closes the window and forgets the counter.
pub(crate) fn request_transfer_exit(
    cfg: &mut RequestTransferExitConfig,
    ctx: &mut DiagnosticContext,
    msg: &mut MsgContext<'_>,
) -> ServiceResult {
    if !msg.request.is_empty() {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    if ctx.transfer.phase == TransferPhase::Idle {
        return Err(NegativeResponseCode::RequestSequenceError);
    }
    if let Some(exit) = cfg.exit.as_mut() {
        exit(ctx.op_status())?;
    }
    ctx.transfer.reset();
    msg.response_len = 0;
    Ok(Handled::Done)
}
