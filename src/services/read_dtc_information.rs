use byteorder::{BigEndian, ByteOrder};

use crate::{
    backend::{Dem, DemError},
    config::{DtcReport, ReadDtcConfig},
    context::MsgContext,
    services::{Handled, ServiceResult},
    NegativeResponseCode,
};

/// DTCFormatIdentifier for ISO 14229-1 three-byte DTCs.
const DTC_FORMAT_ISO_14229: u8 = 0x01;

fn dem_nrc(error: DemError) -> NegativeResponseCode {
    match error {
        DemError::BufferTooSmall => NegativeResponseCode::ResponseTooLong,
        DemError::Busy | DemError::Failed => NegativeResponseCode::RequestOutOfRange,
    }
}

/// ReadDTCInformation (0x19): dispatches on the report type byte.
pub(crate) fn handle(
    cfg: &ReadDtcConfig,
    dem: &mut dyn Dem,
    msg: &mut MsgContext<'_>,
) -> ServiceResult {
    if msg.request.is_empty() {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    let report = DtcReport::from_sub_function(msg.request[0])
        .filter(|report| cfg.reports.contains(report));
    let Some(report) = report else {
        return Err(NegativeResponseCode::SubFunctionNotSupported);
    };

    match report {
        DtcReport::NumberOfDtcByStatusMask => number_of_dtc_by_status_mask(dem, msg),
        DtcReport::DtcByStatusMask => dtc_by_status_mask(dem, msg),
        DtcReport::DtcSnapshotIdentification => snapshot_identification(dem, msg),
        DtcReport::DtcSnapshotRecordByDtcNumber => record_by_dtc_number(dem, msg, false),
        DtcReport::DtcExtendedDataRecordByDtcNumber => record_by_dtc_number(dem, msg, true),
    }
}

/// 0x01: `statusMask -> 0x01, mask, formatIdentifier, count u16`.
fn number_of_dtc_by_status_mask(dem: &mut dyn Dem, msg: &mut MsgContext<'_>) -> ServiceResult {
    if msg.request.len() != 2 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    let status_mask = msg.request[1];
    dem.set_dtc_filter(status_mask).map_err(dem_nrc)?;
    let count = dem.filtered_dtc_count().map_err(dem_nrc)?;

    msg.response[0] = 0x01;
    msg.response[1] = status_mask;
    msg.response[2] = DTC_FORMAT_ISO_14229;
    BigEndian::write_u16(&mut msg.response[3..5], count);
    msg.response_len = 5;
    Ok(Handled::Done)
}

/// 0x02: `statusMask -> 0x02, mask, {DTC u24, status}*`.
fn dtc_by_status_mask(dem: &mut dyn Dem, msg: &mut MsgContext<'_>) -> ServiceResult {
    if msg.request.len() != 2 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    let status_mask = msg.request[1];
    dem.set_dtc_filter(status_mask).map_err(dem_nrc)?;
    let count = dem.filtered_dtc_count().map_err(dem_nrc)?;

    let needed = 2 + usize::from(count) * 4;
    if needed > msg.capacity() {
        return Err(NegativeResponseCode::ResponseTooLong);
    }
    msg.response[0] = 0x02;
    msg.response[1] = status_mask;
    for i in 0..usize::from(count) {
        let (dtc, status) = dem.next_filtered_dtc().map_err(dem_nrc)?;
        let at = 2 + i * 4;
        BigEndian::write_u24(&mut msg.response[at..at + 3], dtc);
        msg.response[at + 3] = u8::from(status);
    }
    msg.response_len = needed;
    Ok(Handled::Done)
}

/// 0x03: `-> 0x03, {DTC u24, recordNumber}*`.
fn snapshot_identification(dem: &mut dyn Dem, msg: &mut MsgContext<'_>) -> ServiceResult {
    if msg.request.len() != 1 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    dem.set_freeze_frame_record_filter().map_err(dem_nrc)?;
    let count = dem.freeze_frame_record_count().map_err(dem_nrc)?;

    let needed = 1 + usize::from(count) * 4;
    if needed > msg.capacity() {
        return Err(NegativeResponseCode::ResponseTooLong);
    }
    msg.response[0] = 0x03;
    for i in 0..usize::from(count) {
        let (dtc, record) = dem.next_freeze_frame_record().map_err(dem_nrc)?;
        let at = 1 + i * 4;
        BigEndian::write_u24(&mut msg.response[at..at + 3], dtc);
        msg.response[at + 3] = record;
    }
    msg.response_len = needed;
    Ok(Handled::Done)
}

/// 0x04 / 0x06: `DTC u24, recordNumber -> sub, data...` with the record data
/// pulled from DEM into the response buffer.
fn record_by_dtc_number(
    dem: &mut dyn Dem,
    msg: &mut MsgContext<'_>,
    extended: bool,
) -> ServiceResult {
    if msg.request.len() != 5 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    let dtc = BigEndian::read_u24(&msg.request[1..4]);
    let record = msg.request[4];
    dem.select_dtc(dtc).map_err(dem_nrc)?;
    dem.select_freeze_frame_data(record).map_err(dem_nrc)?;

    let (head, payload) = msg.response.split_at_mut(1);
    let read = if extended {
        dem.read_extended_data_record(payload)
    } else {
        dem.read_freeze_frame_data(payload)
    };
    let len = read.map_err(dem_nrc)?;

    head[0] = if extended { 0x06 } else { 0x04 };
    msg.response_len = 1 + len;
    Ok(Handled::Done)
}
