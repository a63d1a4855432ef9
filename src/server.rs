use crate::{
    backend::Dem,
    config::{NvmStatusFn, ServiceEntry, ServiceHandler, SessionChangeFn, TimingConfig},
    context::{
        Addressing, DiagnosticContext, MsgContext, OpStatus, RequestSource, ResetKind,
        TransferPhase,
    },
    services::{self, Handled, ServiceResult},
    session::DEFAULT_SESSION,
    Error, NegativeResponseCode, ServiceId,
};

const MIN_RX_BUFFER: usize = 8;
const MIN_TX_BUFFER: usize = 8;
/// Classic ISO-TP payload bound; the default for both directions.
const DEFAULT_BUFFER: usize = 4095;

/// What the transport should do after feeding a request to
/// [`UdsServer::process`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchOutcome {
    /// A final response (positive or negative) is waiting in
    /// [`UdsServer::response`].
    Respond,
    /// An RCRRP is waiting in [`UdsServer::response`]; the final response
    /// arrives through [`UdsServer::main_function`].
    RespondPending,
    /// The handler deferred without anything to transmit yet; keep calling
    /// [`UdsServer::main_function`].
    Deferred,
    /// Functionally addressed request for a service that does not accept
    /// functional addressing; nothing is transmitted.
    Discard,
}

/// Events surfaced by the periodic [`UdsServer::main_function`] tick.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TickEvent {
    /// Transmit `0x7F <sid> 0x78` (see [`response_pending_frame`]) and keep
    /// waiting; the conversation stays open.
    ResponsePending { sid: u8 },
    /// A deferred request finished; the final response is in
    /// [`UdsServer::response`].
    ResponseReady,
    /// S3 expired: the server fell back to the default session and locked
    /// security.
    SessionTimeout,
    /// The reset delay elapsed; the integrator performs the reset now.
    ExecuteReset(ResetKind),
}

/// The negative response the transport repeats while a handler is pending.
#[must_use]
pub fn response_pending_frame(sid: u8) -> [u8; 3] {
    [
        ServiceId::NEGATIVE_RESPONSE,
        sid,
        u8::from(NegativeResponseCode::RequestCorrectlyReceivedResponsePending),
    ]
}

struct ActiveRequest {
    index: usize,
    sid: u8,
    source: RequestSource,
}

/// The UDS service dispatcher.
///
/// Owns the process-wide [`DiagnosticContext`], the configured dispatch
/// table and the transmit buffer. Drive it from exactly one logical
/// executor: feed requests through [`process`](Self::process) and call
/// [`main_function`](Self::main_function) once per timing tick.
pub struct UdsServer {
    timing: TimingConfig,
    services: Vec<ServiceEntry>,
    context: DiagnosticContext,
    dem: Option<Box<dyn Dem + Send>>,
    nvm_status: Option<NvmStatusFn>,
    session_change: Option<SessionChangeFn>,
    rx_buffer_size: usize,
    rx: Vec<u8>,
    tx: Vec<u8>,
    tx_len: usize,
    active: Option<ActiveRequest>,
}

impl UdsServer {
    #[must_use]
    pub fn builder() -> UdsServerBuilder {
        UdsServerBuilder::default()
    }

    /// Dispatch one complete request frame (SID byte included).
    ///
    /// Reloads S3, gates the request against the dispatch table and runs the
    /// handler. A still-deferred previous request is cancelled first.
    pub fn process(&mut self, request: &[u8], source: RequestSource) -> DispatchOutcome {
        if self.active.is_some() {
            self.cancel();
        }
        self.context.timer_s3 = self.timing.s3_server;

        if request.is_empty() {
            return self.negative(0x00, NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
        }
        let sid = request[0];
        let Some(index) = self
            .services
            .iter()
            .position(|entry| entry.handler.service_id().sid() == sid)
        else {
            return self.negative(sid, NegativeResponseCode::ServiceNotSupported);
        };

        let entry = &self.services[index];
        let addressing_ok = entry.addressing.allows(source.addressing);
        let session_ok = entry.sessions.allows(self.context.session);
        let security_ok = entry.security.allows(self.context.security_level);
        if !addressing_ok {
            return match source.addressing {
                Addressing::Functional => DispatchOutcome::Discard,
                Addressing::Physical => self.negative(sid, NegativeResponseCode::ServiceNotSupported),
            };
        }
        if !session_ok {
            return self.negative(sid, NegativeResponseCode::ServiceNotSupportedInActiveSession);
        }
        if !security_ok {
            return self.negative(sid, NegativeResponseCode::SecurityAccessDenied);
        }
        if request.len() - 1 > self.rx_buffer_size {
            return self.negative(sid, NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
        }

        self.rx.clear();
        self.rx.extend_from_slice(&request[1..]);
        self.context.op_status = OpStatus::Initial;
        // first response deadline; once an RCRRP went out the deadline
        // stretches to P2ServerMax
        self.context.timer_p2 = self.timing.p2_server_min;
        self.active = Some(ActiveRequest { index, sid, source });

        let (result, response_len) = self.invoke();
        self.conclude(result, response_len)
    }

    /// Periodic tick driving the S3, P2 and reset timers.
    ///
    /// While a request is deferred, each P2 expiry surfaces a
    /// [`TickEvent::ResponsePending`] and re-invokes the handler; otherwise
    /// the session idle countdown runs.
    pub fn main_function(&mut self) -> Vec<TickEvent> {
        let mut events = Vec::new();

        if self.context.timer_reset > 0 {
            self.context.timer_reset -= 1;
            if self.context.timer_reset == 0 {
                if let Some(kind) = self.context.reset_pending.take() {
                    events.push(TickEvent::ExecuteReset(kind));
                }
            }
        }

        if self.context.security.delay_timer > 0 {
            self.context.security.delay_timer -= 1;
        }

        if self.active.is_some() {
            match self.context.op_status {
                OpStatus::ForceRcrrpOk => {
                    // the forced RCRRP is on the wire; acknowledge it to the
                    // handler right away
                    let (result, response_len) = self.invoke();
                    self.conclude_deferred(result, response_len, &mut events);
                }
                OpStatus::Pending => {
                    if self.context.timer_p2 > 0 {
                        self.context.timer_p2 -= 1;
                    }
                    if self.context.timer_p2 == 0 {
                        if let Some(active) = self.active.as_ref() {
                            events.push(TickEvent::ResponsePending { sid: active.sid });
                        }
                        let (result, response_len) = self.invoke();
                        self.conclude_deferred(result, response_len, &mut events);
                    }
                }
                OpStatus::Initial | OpStatus::Cancel => {}
            }
        } else if self.context.timer_s3 > 0 {
            self.context.timer_s3 -= 1;
            if self.context.timer_s3 == 0 {
                self.session_timeout(&mut events);
                self.context.timer_s3 = self.timing.s3_server;
            }
        }

        events
    }

    /// The transport lost the conversation (new request, bus gone): give the
    /// active handler one pass to release resources, then drop the request.
    pub fn cancel(&mut self) {
        if self.active.is_some() {
            self.context.op_status = OpStatus::Cancel;
            let _ = self.invoke();
            self.active = None;
        }
    }

    /// Wire bytes of the most recent response.
    #[must_use]
    pub fn response(&self) -> &[u8] {
        &self.tx[..self.tx_len]
    }

    #[must_use]
    pub fn context(&self) -> &DiagnosticContext {
        &self.context
    }

    #[must_use]
    pub fn session(&self) -> u8 {
        self.context.session
    }

    #[must_use]
    pub fn security_level(&self) -> u8 {
        self.context.security_level
    }

    fn invoke(&mut self) -> (ServiceResult, usize) {
        let Self {
            services,
            context,
            dem,
            nvm_status,
            session_change,
            timing,
            rx,
            tx,
            active,
            rx_buffer_size,
            ..
        } = self;
        let Some(active) = active.as_ref() else {
            return (Err(NegativeResponseCode::GeneralReject), 0);
        };
        let entry = &mut services[active.index];
        let (_, response) = tx.split_at_mut(1);
        let mut msg = MsgContext {
            request: rx.as_slice(),
            response,
            response_len: 0,
            addressing: active.source.addressing,
            protocol: active.source.protocol,
        };

        let result = match &mut entry.handler {
            ServiceHandler::SessionControl(cfg) => services::session_control::handle(
                cfg,
                timing,
                context,
                &mut msg,
                session_change.as_mut(),
            ),
            ServiceHandler::EcuReset(cfg) => services::ecu_reset::handle(cfg, context, &mut msg),
            ServiceHandler::ClearDiagnosticInformation => match dem.as_deref_mut() {
                Some(dem) => services::clear_diagnostic_info::handle(
                    dem,
                    nvm_status.as_mut(),
                    context.op_status(),
                    &mut msg,
                ),
                None => Err(NegativeResponseCode::ConditionsNotCorrect),
            },
            ServiceHandler::ReadDtcInformation(cfg) => match dem.as_deref_mut() {
                Some(dem) => services::read_dtc_information::handle(cfg, dem, &mut msg),
                None => Err(NegativeResponseCode::ConditionsNotCorrect),
            },
            ServiceHandler::ReadDataByIdentifier(cfg) => {
                services::read_data_by_identifier::handle(cfg, context, &mut msg)
            }
            ServiceHandler::SecurityAccess(cfg) => {
                services::security_access::handle(cfg, context, &mut msg)
            }
            ServiceHandler::WriteDataByIdentifier(cfg) => {
                services::write_data_by_identifier::handle(cfg, context, &mut msg)
            }
            ServiceHandler::IoControlByIdentifier(cfg) => {
                services::io_control::handle(cfg, context, &mut msg)
            }
            ServiceHandler::RoutineControl(cfg) => {
                services::routine_control::handle(cfg, context, &mut msg)
            }
            ServiceHandler::RequestDownload(cfg) => {
                services::upload_download::request_download(cfg, *rx_buffer_size, context, &mut msg)
            }
            ServiceHandler::RequestUpload(cfg) => {
                services::upload_download::request_upload(cfg, *rx_buffer_size, context, &mut msg)
            }
            ServiceHandler::TransferData(cfg) => {
                services::upload_download::transfer_data(cfg, context, &mut msg)
            }
            ServiceHandler::RequestTransferExit(cfg) => {
                services::upload_download::request_transfer_exit(cfg, context, &mut msg)
            }
            ServiceHandler::TesterPresent => services::tester_present::handle(&mut msg),
            ServiceHandler::ControlDtcSetting => match dem.as_deref_mut() {
                Some(dem) => services::control_dtc_setting::handle(dem, &mut msg),
                None => Err(NegativeResponseCode::ConditionsNotCorrect),
            },
        };
        (result, msg.response_len)
    }

    /// Outcome of the first handler pass, straight from `process`.
    fn conclude(&mut self, result: ServiceResult, response_len: usize) -> DispatchOutcome {
        let sid = match self.active.as_ref() {
            Some(active) => active.sid,
            None => return DispatchOutcome::Discard,
        };
        match result {
            Ok(Handled::Done) => {
                self.finish_positive(sid, response_len);
                DispatchOutcome::Respond
            }
            Ok(Handled::Pending)
            | Err(NegativeResponseCode::RequestCorrectlyReceivedResponsePending) => {
                // the P2ServerMin deadline armed on reception keeps running
                self.context.op_status = OpStatus::Pending;
                DispatchOutcome::Deferred
            }
            Ok(Handled::ForceRcrrp) => {
                self.context.op_status = OpStatus::ForceRcrrpOk;
                let frame = response_pending_frame(sid);
                self.tx[..3].copy_from_slice(&frame);
                self.tx_len = 3;
                DispatchOutcome::RespondPending
            }
            Err(nrc) => {
                self.active = None;
                self.negative(sid, nrc)
            }
        }
    }

    /// Outcome of a re-invocation from the tick path.
    fn conclude_deferred(
        &mut self,
        result: ServiceResult,
        response_len: usize,
        events: &mut Vec<TickEvent>,
    ) {
        let sid = match self.active.as_ref() {
            Some(active) => active.sid,
            None => return,
        };
        match result {
            Ok(Handled::Done) => {
                self.finish_positive(sid, response_len);
                events.push(TickEvent::ResponseReady);
            }
            Ok(Handled::Pending)
            | Err(NegativeResponseCode::RequestCorrectlyReceivedResponsePending) => {
                self.context.op_status = OpStatus::Pending;
                // an RCRRP is out, so the next deadline runs at P2ServerMax
                self.context.timer_p2 = self.timing.p2_server_max;
            }
            Ok(Handled::ForceRcrrp) => {
                self.context.op_status = OpStatus::ForceRcrrpOk;
                events.push(TickEvent::ResponsePending { sid });
            }
            Err(nrc) => {
                self.active = None;
                self.negative(sid, nrc);
                events.push(TickEvent::ResponseReady);
            }
        }
    }

    fn finish_positive(&mut self, sid: u8, response_len: usize) {
        self.tx[0] = sid.wrapping_add(ServiceId::POSITIVE_RESPONSE_OFFSET);
        self.tx_len = 1 + response_len;
        self.active = None;
    }

    fn negative(&mut self, sid: u8, nrc: NegativeResponseCode) -> DispatchOutcome {
        tracing::debug!(sid, %nrc, "negative response");
        self.tx[0] = ServiceId::NEGATIVE_RESPONSE;
        self.tx[1] = sid;
        self.tx[2] = u8::from(nrc);
        self.tx_len = 3;
        self.active = None;
        DispatchOutcome::Respond
    }

    fn session_timeout(&mut self, events: &mut Vec<TickEvent>) {
        let stale = self.context.session != DEFAULT_SESSION
            || self.context.security_level != 0
            || self.context.transfer.phase != TransferPhase::Idle;
        if !stale {
            return;
        }
        tracing::warn!(
            session = self.context.session,
            "S3 expired, falling back to the default session"
        );
        let old = self.context.session;
        self.context.enter_session(DEFAULT_SESSION);
        if old != DEFAULT_SESSION {
            if let Some(indication) = self.session_change.as_mut() {
                indication(old, DEFAULT_SESSION);
            }
        }
        events.push(TickEvent::SessionTimeout);
    }
}

/// Construction-time configuration of a [`UdsServer`]. Services left
/// unregistered answer `serviceNotSupported`.
pub struct UdsServerBuilder {
    timing: TimingConfig,
    rx_buffer_size: usize,
    tx_buffer_size: usize,
    services: Vec<ServiceEntry>,
    dem: Option<Box<dyn Dem + Send>>,
    nvm_status: Option<NvmStatusFn>,
    session_change: Option<SessionChangeFn>,
}

impl Default for UdsServerBuilder {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            rx_buffer_size: DEFAULT_BUFFER,
            tx_buffer_size: DEFAULT_BUFFER,
            services: Vec::new(),
            dem: None,
            nvm_status: None,
            session_change: None,
        }
    }
}

impl UdsServerBuilder {
    #[must_use]
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Largest request payload accepted, SID byte excluded. Also the
    /// starting block length offered on RequestDownload/Upload.
    #[must_use]
    pub fn rx_buffer_size(mut self, size: usize) -> Self {
        self.rx_buffer_size = size;
        self
    }

    /// Transmit buffer size, response SID byte included; everything after
    /// that byte is the response capacity handlers see.
    #[must_use]
    pub fn tx_buffer_size(mut self, size: usize) -> Self {
        self.tx_buffer_size = size;
        self
    }

    #[must_use]
    pub fn service(mut self, entry: ServiceEntry) -> Self {
        self.services.push(entry);
        self
    }

    /// Fault-memory backend; required by the DTC-facing services.
    #[must_use]
    pub fn dem(mut self, dem: impl Dem + Send + 'static) -> Self {
        self.dem = Some(Box::new(dem));
        self
    }

    /// NVM status probe; with one configured, ClearDiagnosticInformation
    /// stays pending until the manager reports idle.
    #[must_use]
    pub fn nvm_status(mut self, probe: impl FnMut() -> crate::NvmStatus + Send + 'static) -> Self {
        self.nvm_status = Some(Box::new(probe));
        self
    }

    /// Notification for every session change, whether requested or forced by
    /// an S3 timeout.
    #[must_use]
    pub fn on_session_change(mut self, indication: impl FnMut(u8, u8) + Send + 'static) -> Self {
        self.session_change = Some(Box::new(indication));
        self
    }

    pub fn build(self) -> Result<UdsServer, Error> {
        let Self {
            timing,
            rx_buffer_size,
            tx_buffer_size,
            services,
            dem,
            nvm_status,
            session_change,
        } = self;

        if timing.p2_server_min > timing.p2_server_max {
            return Err(Error::InvalidTiming {
                min: timing.p2_server_min,
                max: timing.p2_server_max,
            });
        }
        if tx_buffer_size < MIN_TX_BUFFER {
            return Err(Error::TransmitBufferTooSmall(tx_buffer_size));
        }
        if rx_buffer_size < MIN_RX_BUFFER {
            return Err(Error::ReceiveBufferTooSmall(rx_buffer_size));
        }

        for (i, entry) in services.iter().enumerate() {
            let id = entry.handler.service_id();
            if services[..i].iter().any(|e| e.handler.service_id() == id) {
                return Err(Error::DuplicateService(id));
            }
            if entry.handler.needs_dem() && dem.is_none() {
                return Err(Error::MissingDem(id));
            }
            match &entry.handler {
                ServiceHandler::SessionControl(cfg) => {
                    for &session in &cfg.sessions {
                        if !(1..=16).contains(&session) {
                            return Err(Error::InvalidSession(session));
                        }
                    }
                }
                ServiceHandler::SecurityAccess(cfg) => {
                    for (j, level) in cfg.levels.iter().enumerate() {
                        if !(1..=8).contains(&level.level) {
                            return Err(Error::InvalidSecurityLevel(level.level));
                        }
                        if cfg.levels[..j].iter().any(|l| l.level == level.level) {
                            return Err(Error::DuplicateSecurityLevel(level.level));
                        }
                        if level.seed_size == 0 || level.key_size == 0 {
                            return Err(Error::InvalidSecuritySize(level.level));
                        }
                        if 2 + level.seed_size > tx_buffer_size {
                            return Err(Error::TransmitBufferTooSmall(tx_buffer_size));
                        }
                    }
                }
                _ => {}
            }
        }

        let context = DiagnosticContext::new(timing.s3_server);
        Ok(UdsServer {
            timing,
            services,
            context,
            dem,
            nvm_status,
            session_change,
            rx_buffer_size,
            rx: Vec::with_capacity(rx_buffer_size),
            tx: vec![0; tx_buffer_size],
            tx_len: 0,
            active: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        backend::{DemError, DtcStatus, NvmStatus, TransferResult},
        config::{
            EcuResetConfig, Gating, IoControlConfig, IoControlDid, ReadDid, ReadDidConfig,
            ReadDtcConfig, RequestDownloadConfig, RequestTransferExitConfig, RequestUploadConfig,
            Routine, RoutineControlConfig, SecurityAccessConfig, SecurityLevel,
            SessionControlConfig, TransferDataConfig, WriteDid, WriteDidConfig,
        },
        session::{SecurityMask, SessionMask},
    };

    fn test_timing() -> TimingConfig {
        TimingConfig { s3_server: 5, p2_server_min: 1, p2_server_max: 2, period_ms: 10 }
    }

    fn session_control_entry() -> ServiceEntry {
        ServiceEntry::new(ServiceHandler::SessionControl(SessionControlConfig {
            sessions: vec![0x01, 0x03],
            permission: None,
        }))
    }

    fn download_entry(block_len: u16) -> ServiceEntry {
        ServiceEntry::new(ServiceHandler::RequestDownload(RequestDownloadConfig {
            process: Box::new(move |_, _, _, _, block| {
                *block = u32::from(block_len);
                Ok(())
            }),
        }))
    }

    fn exit_entry() -> ServiceEntry {
        ServiceEntry::new(ServiceHandler::RequestTransferExit(
            RequestTransferExitConfig::default(),
        ))
    }

    fn respond(server: &mut UdsServer, request: &[u8]) -> Vec<u8> {
        let outcome = server.process(request, RequestSource::physical());
        assert_eq!(outcome, DispatchOutcome::Respond);
        server.response().to_vec()
    }

    #[derive(Default)]
    struct DemState {
        dtcs: Vec<(u32, u8)>,
        records: Vec<(u32, u8)>,
        snapshot_data: Vec<u8>,
        extended_data: Vec<u8>,
        selected: u32,
        cleared: Vec<u32>,
        dtc_setting: Option<bool>,
        dtc_cursor: usize,
        record_cursor: usize,
    }

    #[derive(Clone, Default)]
    struct MockDem(Arc<Mutex<DemState>>);

    impl Dem for MockDem {
        fn select_dtc(&mut self, dtc: u32) -> Result<(), DemError> {
            self.0.lock().unwrap().selected = dtc;
            Ok(())
        }

        fn clear_dtc(&mut self) -> Result<(), DemError> {
            let mut state = self.0.lock().unwrap();
            let selected = state.selected;
            state.cleared.push(selected);
            Ok(())
        }

        fn set_dtc_filter(&mut self, _status_mask: u8) -> Result<(), DemError> {
            self.0.lock().unwrap().dtc_cursor = 0;
            Ok(())
        }

        fn filtered_dtc_count(&mut self) -> Result<u16, DemError> {
            Ok(self.0.lock().unwrap().dtcs.len() as u16)
        }

        fn next_filtered_dtc(&mut self) -> Result<(u32, DtcStatus), DemError> {
            let mut state = self.0.lock().unwrap();
            let (dtc, status) = *state.dtcs.get(state.dtc_cursor).ok_or(DemError::Failed)?;
            state.dtc_cursor += 1;
            Ok((dtc, DtcStatus::from(status)))
        }

        fn set_freeze_frame_record_filter(&mut self) -> Result<(), DemError> {
            self.0.lock().unwrap().record_cursor = 0;
            Ok(())
        }

        fn freeze_frame_record_count(&mut self) -> Result<u16, DemError> {
            Ok(self.0.lock().unwrap().records.len() as u16)
        }

        fn next_freeze_frame_record(&mut self) -> Result<(u32, u8), DemError> {
            let mut state = self.0.lock().unwrap();
            let pair = *state.records.get(state.record_cursor).ok_or(DemError::Failed)?;
            state.record_cursor += 1;
            Ok(pair)
        }

        fn select_freeze_frame_data(&mut self, _record: u8) -> Result<(), DemError> {
            Ok(())
        }

        fn read_freeze_frame_data(&mut self, buf: &mut [u8]) -> Result<usize, DemError> {
            let state = self.0.lock().unwrap();
            if state.snapshot_data.len() > buf.len() {
                return Err(DemError::BufferTooSmall);
            }
            buf[..state.snapshot_data.len()].copy_from_slice(&state.snapshot_data);
            Ok(state.snapshot_data.len())
        }

        fn read_extended_data_record(&mut self, buf: &mut [u8]) -> Result<usize, DemError> {
            let state = self.0.lock().unwrap();
            if state.extended_data.len() > buf.len() {
                return Err(DemError::BufferTooSmall);
            }
            buf[..state.extended_data.len()].copy_from_slice(&state.extended_data);
            Ok(state.extended_data.len())
        }

        fn enable_dtc_setting(&mut self) {
            self.0.lock().unwrap().dtc_setting = Some(true);
        }

        fn disable_dtc_setting(&mut self) {
            self.0.lock().unwrap().dtc_setting = Some(false);
        }
    }

    #[test]
    fn unsupported_sid_is_rejected() {
        let mut server = UdsServer::builder()
            .service(ServiceEntry::new(ServiceHandler::TesterPresent))
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x10, 0x03]), [0x7F, 0x10, 0x11]);
        assert_eq!(server.session(), 0x01);
    }

    #[test]
    fn empty_request_never_reaches_a_handler() {
        let mut server = UdsServer::builder()
            .service(ServiceEntry::new(ServiceHandler::TesterPresent))
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[]), [0x7F, 0x00, 0x13]);
    }

    #[test]
    fn tester_present_echoes_the_zero_sub_function() {
        let mut server = UdsServer::builder()
            .service(ServiceEntry::new(ServiceHandler::TesterPresent))
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x3E, 0x00]), [0x7E, 0x00]);
        assert_eq!(respond(&mut server, &[0x3E]), [0x7F, 0x3E, 0x13]);
        assert_eq!(respond(&mut server, &[0x3E, 0x80]), [0x7F, 0x3E, 0x12]);
    }

    #[test]
    fn session_change_reports_s3_and_p2_star() {
        // 500 ticks x 10 ms S3 and 50 ticks x 10 ms P2ServerMax in 10 ms units
        let timing =
            TimingConfig { s3_server: 500, p2_server_min: 2, p2_server_max: 50, period_ms: 10 };
        let mut server = UdsServer::builder()
            .timing(timing)
            .service(session_control_entry())
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x10, 0x03]), [0x50, 0x03, 0x13, 0x88, 0x00, 0x32]);
        assert_eq!(server.session(), 0x03);
    }

    #[test]
    fn session_change_locks_security_and_transfer() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(session_control_entry())
            .build()
            .unwrap();
        server.context.security_level = 2;
        server.context.transfer.begin(TransferPhase::Download, 0x1000, 0x100);
        respond(&mut server, &[0x10, 0x03]);
        assert_eq!(server.security_level(), 0);
        assert_eq!(server.context().transfer.phase, TransferPhase::Idle);
    }

    #[test]
    fn session_change_rejects_bad_requests() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(session_control_entry())
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x10, 0x02]), [0x7F, 0x10, 0x12]);
        assert_eq!(respond(&mut server, &[0x10]), [0x7F, 0x10, 0x13]);
        assert_eq!(respond(&mut server, &[0x10, 0x03, 0x00]), [0x7F, 0x10, 0x13]);
    }

    #[test]
    fn session_change_respects_the_permission_callback() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::SessionControl(SessionControlConfig {
                sessions: vec![0x01, 0x03],
                permission: Some(Box::new(|_, _| {
                    Err(NegativeResponseCode::ConditionsNotCorrect)
                })),
            })))
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x10, 0x03]), [0x7F, 0x10, 0x22]);
        assert_eq!(server.session(), 0x01);
    }

    #[test]
    fn download_transfer_exit_round_trip() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&written);
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(download_entry(0x20))
            .service(ServiceEntry::new(ServiceHandler::TransferData(TransferDataConfig {
                write: Some(Box::new(move |_, _, data| {
                    sink.lock().unwrap().extend_from_slice(data);
                    TransferResult::Ok
                })),
                read: None,
            })))
            .service(exit_entry())
            .build()
            .unwrap();

        let request = [0x34, 0x00, 0x44, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20];
        assert_eq!(respond(&mut server, &request), [0x74, 0x20, 0x00, 0x20]);
        assert_eq!(server.context().transfer.phase, TransferPhase::Download);
        assert_eq!(server.context().transfer.memory_address, 0x0010_0000);

        let block = [0x36, 0x01, 0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7];
        assert_eq!(respond(&mut server, &block), [0x76, 0x01]);
        assert_eq!(server.context().transfer.offset, 8);
        assert_eq!(*written.lock().unwrap(), [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7]);

        assert_eq!(respond(&mut server, &[0x37]), [0x77]);
        assert_eq!(server.context().transfer.phase, TransferPhase::Idle);
        assert_eq!(server.context().transfer.offset, 0);
    }

    #[test]
    fn repeated_block_counter_is_rejected() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(download_entry(0x20))
            .service(ServiceEntry::new(ServiceHandler::TransferData(TransferDataConfig {
                write: Some(Box::new(|_, _, _| TransferResult::Ok)),
                read: None,
            })))
            .build()
            .unwrap();

        let request = [0x34, 0x00, 0x44, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20];
        respond(&mut server, &request);
        assert_eq!(respond(&mut server, &[0x36, 0x01, 0xA0]), [0x76, 0x01]);
        assert_eq!(respond(&mut server, &[0x36, 0x01, 0xA1]), [0x7F, 0x36, 0x73]);
    }

    #[test]
    fn transfer_without_a_window_is_a_sequence_error() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::TransferData(TransferDataConfig {
                write: Some(Box::new(|_, _, _| TransferResult::Ok)),
                read: None,
            })))
            .service(exit_entry())
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x36, 0x01, 0x00]), [0x7F, 0x36, 0x24]);
        assert_eq!(respond(&mut server, &[0x37]), [0x7F, 0x37, 0x24]);
    }

    #[test]
    fn block_counter_wraps_at_ff() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::TransferData(TransferDataConfig {
                write: Some(Box::new(|_, _, _| TransferResult::Ok)),
                read: None,
            })))
            .build()
            .unwrap();
        server.context.transfer.begin(TransferPhase::Download, 0, 0x1000);
        server.context.transfer.block_sequence_counter = 0xFF;
        assert_eq!(respond(&mut server, &[0x36, 0xFF, 0x01]), [0x76, 0xFF]);
        assert_eq!(respond(&mut server, &[0x36, 0x00, 0x02]), [0x76, 0x00]);
        assert_eq!(server.context().transfer.block_sequence_counter, 0x01);
    }

    #[test]
    fn download_chunk_larger_than_the_window_is_rejected() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(download_entry(0x20))
            .service(ServiceEntry::new(ServiceHandler::TransferData(TransferDataConfig {
                write: Some(Box::new(|_, _, _| TransferResult::Ok)),
                read: None,
            })))
            .build()
            .unwrap();
        let request = [0x34, 0x00, 0x44, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04];
        respond(&mut server, &request);
        assert_eq!(
            respond(&mut server, &[0x36, 0x01, 0x01, 0x02, 0x03, 0x04, 0x05]),
            [0x7F, 0x36, 0x13]
        );
    }

    #[test]
    fn upload_round_trip_reads_back_the_window() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::RequestUpload(RequestUploadConfig {
                process: Box::new(|_, _, _, _, _| Ok(())),
            })))
            .service(ServiceEntry::new(ServiceHandler::TransferData(TransferDataConfig {
                write: None,
                read: Some(Box::new(|_, _, buf| {
                    buf.fill(0xAB);
                    TransferResult::Ok
                })),
            })))
            .service(exit_entry())
            .build()
            .unwrap();

        let request = [0x35, 0x00, 0x44, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04];
        assert_eq!(respond(&mut server, &request), [0x75, 0x20, 0x0F, 0xFF]);
        assert_eq!(respond(&mut server, &[0x36, 0x01]), [0x76, 0x01, 0xAB, 0xAB, 0xAB, 0xAB]);
        // extra bytes on an upload block are a length error
        assert_eq!(respond(&mut server, &[0x36, 0x02, 0x00]), [0x7F, 0x36, 0x13]);
        assert_eq!(respond(&mut server, &[0x37]), [0x77]);
    }

    #[test]
    fn second_download_without_exit_is_a_sequence_error() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(download_entry(0x20))
            .build()
            .unwrap();
        let request = [0x34, 0x00, 0x44, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20];
        respond(&mut server, &request);
        assert_eq!(respond(&mut server, &request), [0x7F, 0x34, 0x24]);
    }

    #[test]
    fn read_two_dids_in_request_order() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .tx_buffer_size(40)
            .service(ServiceEntry::new(ServiceHandler::ReadDataByIdentifier(ReadDidConfig {
                dids: vec![
                    ReadDid {
                        id: 0xF190,
                        length: 17,
                        gating: Gating::default(),
                        read: Box::new(|buf| {
                            buf.fill(0x11);
                            Ok(())
                        }),
                    },
                    ReadDid {
                        id: 0xF18C,
                        length: 10,
                        gating: Gating::default(),
                        read: Box::new(|buf| {
                            buf.fill(0x22);
                            Ok(())
                        }),
                    },
                ],
            })))
            .build()
            .unwrap();

        let mut expected = vec![0x62, 0xF1, 0x90];
        expected.extend_from_slice(&[0x11; 17]);
        expected.extend_from_slice(&[0xF1, 0x8C]);
        expected.extend_from_slice(&[0x22; 10]);
        let first = respond(&mut server, &[0x22, 0xF1, 0x90, 0xF1, 0x8C]);
        assert_eq!(first, expected);

        // identical request, byte-identical response
        assert_eq!(respond(&mut server, &[0x22, 0xF1, 0x90, 0xF1, 0x8C]), first);
    }

    #[test]
    fn read_dids_overflowing_the_response_buffer() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .tx_buffer_size(21)
            .service(ServiceEntry::new(ServiceHandler::ReadDataByIdentifier(ReadDidConfig {
                dids: vec![
                    ReadDid {
                        id: 0xF190,
                        length: 17,
                        gating: Gating::default(),
                        read: Box::new(|buf| {
                            buf.fill(0x11);
                            Ok(())
                        }),
                    },
                    ReadDid {
                        id: 0xF18C,
                        length: 10,
                        gating: Gating::default(),
                        read: Box::new(|buf| {
                            buf.fill(0x22);
                            Ok(())
                        }),
                    },
                ],
            })))
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x22, 0xF1, 0x90, 0xF1, 0x8C]), [0x7F, 0x22, 0x14]);
    }

    #[test]
    fn read_did_request_validation() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::ReadDataByIdentifier(ReadDidConfig {
                dids: vec![ReadDid {
                    id: 0xF190,
                    length: 2,
                    gating: Gating::default(),
                    read: Box::new(|buf| {
                        buf.fill(0);
                        Ok(())
                    }),
                }],
            })))
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x22, 0xF1]), [0x7F, 0x22, 0x13]);
        assert_eq!(respond(&mut server, &[0x22, 0xF1, 0x90, 0xF1]), [0x7F, 0x22, 0x13]);
        assert_eq!(respond(&mut server, &[0x22, 0xAA, 0xBB]), [0x7F, 0x22, 0x31]);
    }

    #[test]
    fn write_did_checks_the_configured_length() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&written);
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::WriteDataByIdentifier(WriteDidConfig {
                dids: vec![WriteDid {
                    id: 0xF190,
                    length: 3,
                    gating: Gating::default(),
                    write: Box::new(move |_, data| {
                        sink.lock().unwrap().extend_from_slice(data);
                        Ok(())
                    }),
                }],
            })))
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x2E, 0xF1, 0x90, 0x01, 0x02, 0x03]), [0x6E, 0xF1, 0x90]);
        assert_eq!(*written.lock().unwrap(), [0x01, 0x02, 0x03]);
        assert_eq!(respond(&mut server, &[0x2E, 0xF1, 0x90, 0x01]), [0x7F, 0x2E, 0x13]);
        assert_eq!(respond(&mut server, &[0x2E, 0xAA, 0xBB, 0x01, 0x02, 0x03]), [0x7F, 0x2E, 0x31]);
    }

    #[test]
    fn io_control_runs_the_selected_action() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::IoControlByIdentifier(IoControlConfig {
                dids: vec![IoControlDid {
                    id: 0xBEEF,
                    gating: Gating::default(),
                    actions: [
                        None,
                        None,
                        None,
                        Some(Box::new(|data, out| {
                            out[..data.len()].copy_from_slice(data);
                            Ok(data.len())
                        })),
                        None,
                    ],
                }],
            })))
            .build()
            .unwrap();
        assert_eq!(
            respond(&mut server, &[0x2F, 0xBE, 0xEF, 0x03, 0x55]),
            [0x6F, 0xBE, 0xEF, 0x03, 0x55]
        );
        // unconfigured action slot
        assert_eq!(respond(&mut server, &[0x2F, 0xBE, 0xEF, 0x01]), [0x7F, 0x2F, 0x31]);
        // action byte past longTermAdjustment
        assert_eq!(respond(&mut server, &[0x2F, 0xBE, 0xEF, 0x05]), [0x7F, 0x2F, 0x31]);
        assert_eq!(respond(&mut server, &[0x2F, 0xAA, 0xAA, 0x03]), [0x7F, 0x2F, 0x31]);
    }

    #[test]
    fn routine_control_start_and_missing_sub_functions() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::RoutineControl(RoutineControlConfig {
                routines: vec![Routine {
                    id: 0x0203,
                    gating: Gating::default(),
                    start: Box::new(|_, _, out| {
                        out[..2].copy_from_slice(&[0xAA, 0xBB]);
                        Ok(2)
                    }),
                    stop: None,
                    results: None,
                }],
            })))
            .build()
            .unwrap();
        assert_eq!(
            respond(&mut server, &[0x31, 0x01, 0x02, 0x03]),
            [0x71, 0x01, 0x02, 0x03, 0xAA, 0xBB]
        );
        assert_eq!(respond(&mut server, &[0x31, 0x02, 0x02, 0x03]), [0x7F, 0x31, 0x12]);
        assert_eq!(respond(&mut server, &[0x31, 0x01, 0xFF, 0xFF]), [0x7F, 0x31, 0x31]);
        assert_eq!(respond(&mut server, &[0x31, 0x01]), [0x7F, 0x31, 0x13]);
    }

    fn security_entry(attempt_limit: u8, delay_on_limit: u16) -> ServiceEntry {
        ServiceEntry::new(ServiceHandler::SecurityAccess(SecurityAccessConfig {
            levels: vec![SecurityLevel {
                level: 1,
                seed_size: 4,
                key_size: 4,
                sessions: SessionMask::any(),
                attempt_limit,
                delay_on_limit,
                generate_seed: Box::new(|seed| {
                    seed.copy_from_slice(&[0x01, 0x02, 0x03, 0x04]);
                    Ok(())
                }),
                compare_key: Box::new(|key| key == [0x05, 0x06, 0x07, 0x08]),
            }],
        }))
    }

    #[test]
    fn security_access_seed_key_handshake() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(security_entry(3, 10))
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x27, 0x01]), [0x67, 0x01, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(
            respond(&mut server, &[0x27, 0x02, 0x05, 0x06, 0x07, 0x08]),
            [0x67, 0x02]
        );
        assert_eq!(server.security_level(), 1);

        // once unlocked the seed is all zeroes
        assert_eq!(respond(&mut server, &[0x27, 0x01]), [0x67, 0x01, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn security_access_rejects_unknown_levels_and_bad_lengths() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(security_entry(3, 10))
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x27, 0x05]), [0x7F, 0x27, 0x12]);
        assert_eq!(respond(&mut server, &[0x27, 0x01, 0x00]), [0x7F, 0x27, 0x13]);
        assert_eq!(respond(&mut server, &[0x27, 0x02, 0x05]), [0x7F, 0x27, 0x13]);
    }

    #[test]
    fn send_key_without_a_seed_is_a_sequence_error() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(security_entry(3, 10))
            .build()
            .unwrap();
        assert_eq!(
            respond(&mut server, &[0x27, 0x02, 0x05, 0x06, 0x07, 0x08]),
            [0x7F, 0x27, 0x24]
        );
    }

    #[test]
    fn failed_keys_run_into_the_lockout() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(security_entry(2, 3))
            .build()
            .unwrap();

        respond(&mut server, &[0x27, 0x01]);
        assert_eq!(respond(&mut server, &[0x27, 0x02, 0, 0, 0, 0]), [0x7F, 0x27, 0x35]);
        respond(&mut server, &[0x27, 0x01]);
        assert_eq!(respond(&mut server, &[0x27, 0x02, 0, 0, 0, 0]), [0x7F, 0x27, 0x36]);
        assert_eq!(server.security_level(), 0);

        // locked out until the delay ticks down
        assert_eq!(respond(&mut server, &[0x27, 0x01]), [0x7F, 0x27, 0x37]);
        for _ in 0..3 {
            server.main_function();
        }
        assert_eq!(respond(&mut server, &[0x27, 0x01]), [0x67, 0x01, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn security_level_session_gate_uses_7e() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::SecurityAccess(SecurityAccessConfig {
                levels: vec![SecurityLevel {
                    level: 1,
                    seed_size: 2,
                    key_size: 2,
                    sessions: SessionMask::Extended,
                    attempt_limit: 3,
                    delay_on_limit: 10,
                    generate_seed: Box::new(|seed| {
                        seed.fill(0x5A);
                        Ok(())
                    }),
                    compare_key: Box::new(|_| true),
                }],
            })))
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x27, 0x01]), [0x7F, 0x27, 0x7E]);
    }

    #[test]
    fn dispatcher_gates_services_by_session_and_security() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(
                ServiceEntry::new(ServiceHandler::TesterPresent).sessions(SessionMask::Extended),
            )
            .service(session_control_entry())
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x3E, 0x00]), [0x7F, 0x3E, 0x7F]);
        respond(&mut server, &[0x10, 0x03]);
        assert_eq!(respond(&mut server, &[0x3E, 0x00]), [0x7E, 0x00]);

        let mut locked = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::TesterPresent).security(SecurityMask::Level1))
            .build()
            .unwrap();
        assert_eq!(respond(&mut locked, &[0x3E, 0x00]), [0x7F, 0x3E, 0x33]);
    }

    #[test]
    fn functional_requests_for_physical_services_are_dropped() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::TesterPresent).physical_only())
            .build()
            .unwrap();
        let outcome = server.process(&[0x3E, 0x00], RequestSource::functional());
        assert_eq!(outcome, DispatchOutcome::Discard);
        let outcome = server.process(&[0x3E, 0x00], RequestSource::physical());
        assert_eq!(outcome, DispatchOutcome::Respond);
    }

    #[test]
    fn ecu_reset_fires_after_the_configured_delay() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::EcuReset(EcuResetConfig { delay: 2 })))
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x11, 0x01]), [0x51, 0x01]);
        assert!(server.main_function().is_empty());
        assert_eq!(server.main_function(), [TickEvent::ExecuteReset(ResetKind::Hard)]);
        assert!(server.main_function().is_empty());

        assert_eq!(respond(&mut server, &[0x11, 0x02]), [0x7F, 0x11, 0x12]);
        assert_eq!(respond(&mut server, &[0x11, 0x03]), [0x51, 0x03]);
    }

    #[test]
    fn s3_silence_falls_back_to_the_default_session() {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&changes);
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(session_control_entry())
            .on_session_change(move |old, new| log.lock().unwrap().push((old, new)))
            .build()
            .unwrap();
        respond(&mut server, &[0x10, 0x03]);
        server.context.security_level = 1;

        for _ in 0..4 {
            assert!(server.main_function().is_empty());
        }
        assert_eq!(server.main_function(), [TickEvent::SessionTimeout]);
        assert_eq!(server.session(), 0x01);
        assert_eq!(server.security_level(), 0);
        assert_eq!(*changes.lock().unwrap(), [(0x01, 0x03), (0x03, 0x01)]);
    }

    #[test]
    fn clear_dtc_without_nvm_finishes_inline() {
        let dem = MockDem::default();
        let state = Arc::clone(&dem.0);
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::ClearDiagnosticInformation))
            .dem(dem)
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x14, 0x11, 0x22, 0x33]), [0x54]);
        assert_eq!(state.lock().unwrap().cleared, [0x0011_2233]);
        assert_eq!(respond(&mut server, &[0x14, 0x11, 0x22]), [0x7F, 0x14, 0x13]);
    }

    #[test]
    fn clear_dtc_waits_for_the_nvm_manager() {
        let dem = MockDem::default();
        let state = Arc::clone(&dem.0);
        let nvm = Arc::new(Mutex::new(NvmStatus::Busy));
        let probe = Arc::clone(&nvm);
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::ClearDiagnosticInformation))
            .dem(dem)
            .nvm_status(move || *probe.lock().unwrap())
            .build()
            .unwrap();

        let outcome = server.process(&[0x14, 0xFF, 0xFF, 0xFF], RequestSource::physical());
        assert_eq!(outcome, DispatchOutcome::Deferred);

        // the first RCRRP goes out after P2ServerMin; NVM is still busy
        assert_eq!(server.main_function(), [TickEvent::ResponsePending { sid: 0x14 }]);
        // later deadlines run at P2ServerMax
        assert!(server.main_function().is_empty());

        *nvm.lock().unwrap() = NvmStatus::Idle;
        assert_eq!(
            server.main_function(),
            [TickEvent::ResponsePending { sid: 0x14 }, TickEvent::ResponseReady]
        );
        assert_eq!(server.response(), [0x54]);
        // the clear itself ran exactly once, on the initial pass
        assert_eq!(state.lock().unwrap().cleared, [0x00FF_FFFF]);
    }

    #[test]
    fn control_dtc_setting_forwards_to_dem() {
        let dem = MockDem::default();
        let state = Arc::clone(&dem.0);
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::ControlDtcSetting))
            .dem(dem)
            .build()
            .unwrap();
        assert_eq!(respond(&mut server, &[0x85, 0x01]), [0xC5, 0x01]);
        assert_eq!(state.lock().unwrap().dtc_setting, Some(true));
        assert_eq!(respond(&mut server, &[0x85, 0x02]), [0xC5, 0x02]);
        assert_eq!(state.lock().unwrap().dtc_setting, Some(false));
        assert_eq!(respond(&mut server, &[0x85, 0x03]), [0x7F, 0x85, 0x12]);
    }

    fn dtc_server(dem: MockDem) -> UdsServer {
        UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::ReadDtcInformation(
                ReadDtcConfig::default(),
            )))
            .dem(dem)
            .build()
            .unwrap()
    }

    #[test]
    fn report_number_of_dtc_by_status_mask() {
        let dem = MockDem::default();
        dem.0.lock().unwrap().dtcs = vec![(0x123456, 0x01), (0x654321, 0x09)];
        let mut server = dtc_server(dem);
        assert_eq!(
            respond(&mut server, &[0x19, 0x01, 0xFF]),
            [0x59, 0x01, 0xFF, 0x01, 0x00, 0x02]
        );
        assert_eq!(respond(&mut server, &[0x19, 0x01]), [0x7F, 0x19, 0x13]);
    }

    #[test]
    fn report_dtc_by_status_mask() {
        let dem = MockDem::default();
        dem.0.lock().unwrap().dtcs = vec![(0x123456, 0x01), (0x654321, 0x09)];
        let mut server = dtc_server(dem);
        assert_eq!(
            respond(&mut server, &[0x19, 0x02, 0xFF]),
            [0x59, 0x02, 0xFF, 0x12, 0x34, 0x56, 0x01, 0x65, 0x43, 0x21, 0x09]
        );
    }

    #[test]
    fn report_snapshot_identification() {
        let dem = MockDem::default();
        dem.0.lock().unwrap().records = vec![(0xABCDEF, 0x01)];
        let mut server = dtc_server(dem);
        assert_eq!(respond(&mut server, &[0x19, 0x03]), [0x59, 0x03, 0xAB, 0xCD, 0xEF, 0x01]);
    }

    #[test]
    fn report_snapshot_and_extended_records_by_dtc() {
        let dem = MockDem::default();
        {
            let mut state = dem.0.lock().unwrap();
            state.snapshot_data = vec![0xDE, 0xAD];
            state.extended_data = vec![0xBE, 0xEF];
        }
        let state = Arc::clone(&dem.0);
        let mut server = dtc_server(dem);
        assert_eq!(
            respond(&mut server, &[0x19, 0x04, 0x12, 0x34, 0x56, 0x01]),
            [0x59, 0x04, 0xDE, 0xAD]
        );
        assert_eq!(state.lock().unwrap().selected, 0x123456);
        assert_eq!(
            respond(&mut server, &[0x19, 0x06, 0x12, 0x34, 0x56, 0x01]),
            [0x59, 0x06, 0xBE, 0xEF]
        );
        assert_eq!(respond(&mut server, &[0x19, 0x04, 0x12, 0x34]), [0x7F, 0x19, 0x13]);
    }

    #[test]
    fn unknown_dtc_report_type_is_rejected() {
        let mut server = dtc_server(MockDem::default());
        assert_eq!(respond(&mut server, &[0x19, 0x05]), [0x7F, 0x19, 0x12]);
    }

    #[test]
    fn oversized_dtc_record_reports_response_too_long() {
        let dem = MockDem::default();
        dem.0.lock().unwrap().snapshot_data = vec![0x00; 32];
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .tx_buffer_size(16)
            .service(ServiceEntry::new(ServiceHandler::ReadDtcInformation(
                ReadDtcConfig::default(),
            )))
            .dem(dem)
            .build()
            .unwrap();
        assert_eq!(
            respond(&mut server, &[0x19, 0x04, 0x12, 0x34, 0x56, 0x01]),
            [0x7F, 0x19, 0x14]
        );
    }

    #[test]
    fn pending_write_answers_rcrrp_until_it_settles() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::TransferData(TransferDataConfig {
                write: Some(Box::new(|op, _, _| match op {
                    OpStatus::Initial => TransferResult::Pending,
                    _ => TransferResult::Ok,
                })),
                read: None,
            })))
            .build()
            .unwrap();
        server.context.transfer.begin(TransferPhase::Download, 0, 0x100);

        let outcome = server.process(&[0x36, 0x01, 0x42], RequestSource::physical());
        assert_eq!(outcome, DispatchOutcome::Deferred);
        // P2ServerMin elapses, the RCRRP goes out and the retried write lands
        assert_eq!(
            server.main_function(),
            [TickEvent::ResponsePending { sid: 0x36 }, TickEvent::ResponseReady]
        );
        assert_eq!(server.response(), [0x76, 0x01]);
        assert_eq!(server.context().transfer.offset, 1);
    }

    #[test]
    fn forced_rcrrp_is_transmitted_immediately() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::TransferData(TransferDataConfig {
                write: Some(Box::new(|op, _, _| match op {
                    OpStatus::ForceRcrrpOk => TransferResult::Ok,
                    _ => TransferResult::ForceRcrrp,
                })),
                read: None,
            })))
            .build()
            .unwrap();
        server.context.transfer.begin(TransferPhase::Download, 0, 0x100);

        let outcome = server.process(&[0x36, 0x01, 0x42], RequestSource::physical());
        assert_eq!(outcome, DispatchOutcome::RespondPending);
        assert_eq!(server.response(), response_pending_frame(0x36));
        assert_eq!(server.main_function(), [TickEvent::ResponseReady]);
        assert_eq!(server.response(), [0x76, 0x01]);
    }

    #[test]
    fn failed_write_falls_back_to_general_programming_failure() {
        let mut server = UdsServer::builder()
            .timing(test_timing())
            .service(ServiceEntry::new(ServiceHandler::TransferData(TransferDataConfig {
                write: Some(Box::new(|_, _, _| TransferResult::Failed(None))),
                read: None,
            })))
            .build()
            .unwrap();
        server.context.transfer.begin(TransferPhase::Download, 0, 0x100);
        assert_eq!(respond(&mut server, &[0x36, 0x01, 0x42]), [0x7F, 0x36, 0x72]);
    }

    #[test]
    fn builder_rejects_inconsistent_configurations() {
        let err = UdsServer::builder()
            .service(ServiceEntry::new(ServiceHandler::TesterPresent))
            .service(ServiceEntry::new(ServiceHandler::TesterPresent))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::DuplicateService(ServiceId::TesterPresent)));

        let err = UdsServer::builder()
            .service(ServiceEntry::new(ServiceHandler::ControlDtcSetting))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingDem(ServiceId::ControlDtcSetting)));

        let err = UdsServer::builder()
            .service(ServiceEntry::new(ServiceHandler::SecurityAccess(SecurityAccessConfig {
                levels: vec![SecurityLevel {
                    level: 9,
                    seed_size: 2,
                    key_size: 2,
                    sessions: SessionMask::any(),
                    attempt_limit: 3,
                    delay_on_limit: 10,
                    generate_seed: Box::new(|_| Ok(())),
                    compare_key: Box::new(|_| false),
                }],
            })))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidSecurityLevel(9)));
    }
}
