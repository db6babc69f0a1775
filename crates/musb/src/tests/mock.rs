//! Scripted in-memory core. Tests play the hardware: they load FIFOs, latch
//! CSR bits and raise interrupt status, then call into the controllers and
//! inspect the recorded operations.

use std::collections::VecDeque;
use std::prelude::rust_2021::*;

use crate::buffer::Buffer;
use crate::dma::{DmaChannel, DmaControl};
use crate::regs::{CepCsr, EpCsr, FifoLayout, HostTarget, UsbCore, UsbIrq};
use crate::types::{PipeDir, Role, TestMode, UsbSpeed, VbusLevel};
use crate::{DMA_CHANNELS, MAX_ENDPOINTS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    CepSet(CepCsr),
    CepClear(CepCsr),
    EpSet(u8, PipeDir, EpCsr),
    EpClear(u8, PipeDir, EpCsr),
    WriteFifo(u8, Vec<u8>),
    ReadFifo(u8, usize),
    EnableEpIrq(u8, PipeDir),
    DisableEpIrq(u8, PipeDir),
    EnableUsbIrq(UsbIrq),
    DisableUsbIrq(UsbIrq),
    FunctionAddress(u8),
    TestMode(TestMode),
    BusReset(bool),
    Resume(bool),
    DelayUs(u32),
    DmaStart(u8, u32),
    DmaStop(u8),
    ReqPktCount(u8, u32),
}

fn dir_index(dir: PipeDir) -> usize {
    match dir {
        PipeDir::Tx => 0,
        PipeDir::Rx => 1,
    }
}

/// Strobe bits: acted on by the hardware, never read back.
const EP_STROBES: EpCsr = EpCsr::FLUSH_FIFO.union(EpCsr::CLR_DATA_TOG).union(EpCsr::PKT_RDY);

pub struct MockCore {
    pub ops: Vec<Op>,

    pub usb_irq: UsbIrq,
    pub tx_irq: u16,
    pub rx_irq: u16,
    pub usb_irq_enabled: UsbIrq,
    pub ep_irq_enabled: [[bool; 2]; MAX_ENDPOINTS],

    pub role: Role,
    pub host_mode: bool,
    pub hs_mode: bool,
    pub line_speed: UsbSpeed,
    pub vbus: VbusLevel,
    pub session: bool,
    pub suspended: bool,
    pub soft_connect: bool,
    pub hs_enabled: bool,
    pub function_address: u8,
    pub frame: u16,
    pub now: u32,

    pub cep: CepCsr,
    pub cep_nak_limit: u8,
    pub ep: [[EpCsr; 2]; MAX_ENDPOINTS],
    pub host_targets: [[Option<HostTarget>; 2]; MAX_ENDPOINTS],
    pub fifo_layouts: [[Option<FifoLayout>; 2]; MAX_ENDPOINTS],
    pub max_packet: [[u16; 2]; MAX_ENDPOINTS],

    /// Bytes waiting in each RX FIFO and the count register that goes with
    /// the packet on top.
    pub rx_fifo: [VecDeque<u8>; MAX_ENDPOINTS],
    pub rx_count: [u16; MAX_ENDPOINTS],

    pub dma_control: [Option<DmaControl>; DMA_CHANNELS],
    pub dma_addr: [usize; DMA_CHANNELS],
    pub dma_count: [u32; DMA_CHANNELS],
    pub dma_running: [bool; DMA_CHANNELS],
    pub dma_irq: u8,
    pub dma_bus_error: [bool; DMA_CHANNELS],
}

impl MockCore {
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            usb_irq: UsbIrq::empty(),
            tx_irq: 0,
            rx_irq: 0,
            usb_irq_enabled: UsbIrq::empty(),
            ep_irq_enabled: [[false; 2]; MAX_ENDPOINTS],
            role: Role::ADevice,
            host_mode: false,
            hs_mode: true,
            line_speed: UsbSpeed::High,
            vbus: VbusLevel::AboveVbusValid,
            session: false,
            suspended: false,
            soft_connect: false,
            hs_enabled: false,
            function_address: 0,
            frame: 0,
            now: 0,
            cep: CepCsr::empty(),
            cep_nak_limit: 0,
            ep: [[EpCsr::empty(); 2]; MAX_ENDPOINTS],
            host_targets: [[None; 2]; MAX_ENDPOINTS],
            fifo_layouts: [[None; 2]; MAX_ENDPOINTS],
            max_packet: [[0; 2]; MAX_ENDPOINTS],
            rx_fifo: Default::default(),
            rx_count: [0; MAX_ENDPOINTS],
            dma_control: [None; DMA_CHANNELS],
            dma_addr: [0; DMA_CHANNELS],
            dma_count: [0; DMA_CHANNELS],
            dma_running: [false; DMA_CHANNELS],
            dma_irq: 0,
            dma_bus_error: [false; DMA_CHANNELS],
        }
    }

    pub fn host() -> Self {
        Self {
            host_mode: true,
            ..Self::new()
        }
    }

    pub fn device() -> Self {
        Self {
            role: Role::BDevice,
            ..Self::new()
        }
    }

    /// Puts a received packet into `ep`'s FIFO.
    pub fn load_rx(&mut self, ep: u8, bytes: &[u8]) {
        self.rx_fifo[ep as usize].extend(bytes.iter().copied());
        self.rx_count[ep as usize] = bytes.len() as u16;
    }

    /// A packet arrived on data endpoint `ep`: FIFO loaded, RxPktRdy latched
    /// and the RX interrupt raised.
    pub fn receive(&mut self, ep: u8, bytes: &[u8]) {
        self.load_rx(ep, bytes);
        self.ep[ep as usize][1] |= EpCsr::PKT_RDY;
        self.rx_irq |= 1 << ep;
    }

    /// The DMA engine moved `bytes` on `ch` and raised its interrupt.
    pub fn finish_dma(&mut self, ch: u8, bytes: usize) {
        let i = ch as usize;
        self.dma_addr[i] += bytes;
        self.dma_running[i] = false;
        self.dma_irq |= 1 << ch;
    }

    /// Bytes written to `ep`'s FIFO, one entry per write.
    pub fn written(&self, ep: u8) -> Vec<Vec<u8>> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::WriteFifo(e, bytes) if *e == ep => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, op: &Op) -> Option<usize> {
        self.ops.iter().position(|o| o == op)
    }

    pub fn count(&self, op: &Op) -> usize {
        self.ops.iter().filter(|o| *o == op).count()
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }
}

impl UsbCore for MockCore {
    fn read_usb_irq(&mut self) -> UsbIrq {
        core::mem::take(&mut self.usb_irq)
    }

    fn read_tx_irq(&mut self) -> u16 {
        core::mem::take(&mut self.tx_irq)
    }

    fn read_rx_irq(&mut self) -> u16 {
        core::mem::take(&mut self.rx_irq)
    }

    fn enable_usb_irq(&mut self, irq: UsbIrq) {
        self.usb_irq_enabled |= irq;
        self.ops.push(Op::EnableUsbIrq(irq));
    }

    fn disable_usb_irq(&mut self, irq: UsbIrq) {
        self.usb_irq_enabled &= !irq;
        self.ops.push(Op::DisableUsbIrq(irq));
    }

    fn enable_ep_irq(&mut self, ep: u8, dir: PipeDir) {
        self.ep_irq_enabled[ep as usize][dir_index(dir)] = true;
        self.ops.push(Op::EnableEpIrq(ep, dir));
    }

    fn disable_ep_irq(&mut self, ep: u8, dir: PipeDir) {
        self.ep_irq_enabled[ep as usize][dir_index(dir)] = false;
        self.ops.push(Op::DisableEpIrq(ep, dir));
    }

    fn role(&self) -> Role {
        self.role
    }

    fn is_host_mode(&self) -> bool {
        self.host_mode
    }

    fn is_hs_mode(&self) -> bool {
        self.hs_mode
    }

    fn line_speed(&self) -> UsbSpeed {
        self.line_speed
    }

    fn vbus_level(&self) -> VbusLevel {
        self.vbus
    }

    fn set_session(&mut self, on: bool) {
        self.session = on;
    }

    fn is_session_on(&self) -> bool {
        self.session
    }

    fn set_bus_reset(&mut self, asserted: bool) {
        self.ops.push(Op::BusReset(asserted));
    }

    fn set_resume(&mut self, asserted: bool) {
        self.ops.push(Op::Resume(asserted));
    }

    fn set_suspend_mode(&mut self, enabled: bool) {
        self.suspended = enabled;
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn set_soft_connect(&mut self, connected: bool) {
        self.soft_connect = connected;
    }

    fn enable_hs(&mut self, enabled: bool) {
        self.hs_enabled = enabled;
    }

    fn set_function_address(&mut self, addr: u8) {
        self.function_address = addr;
        self.ops.push(Op::FunctionAddress(addr));
    }

    fn set_test_mode(&mut self, mode: TestMode) {
        self.ops.push(Op::TestMode(mode));
    }

    fn set_host_target(&mut self, ep: u8, dir: PipeDir, target: HostTarget) {
        self.host_targets[ep as usize][dir_index(dir)] = Some(target);
    }

    fn set_cep_nak_limit(&mut self, limit: u8) {
        self.cep_nak_limit = limit;
    }

    fn set_reqpkt_count(&mut self, ep: u8, count: u32) {
        self.ops.push(Op::ReqPktCount(ep, count));
    }

    fn frame_number(&self) -> u16 {
        self.frame
    }

    fn cep_csr(&self) -> CepCsr {
        self.cep
    }

    fn cep_set(&mut self, bits: CepCsr) {
        self.ops.push(Op::CepSet(bits));
        if bits.contains(CepCsr::FLUSH_FIFO) {
            self.rx_fifo[0].clear();
        }
        // the serviced strobes clear the bits they acknowledge
        if !self.host_mode {
            if bits.contains(CepCsr::SERVICED_RX_PKT_RDY) {
                self.cep.remove(CepCsr::RX_PKT_RDY);
            }
            if bits.contains(CepCsr::SERVICED_SETUP_END) {
                self.cep.remove(CepCsr::SETUP_END);
            }
        }
    }

    fn cep_clear(&mut self, bits: CepCsr) {
        self.ops.push(Op::CepClear(bits));
        self.cep.remove(bits);
    }

    fn cep_rx_count(&self) -> u16 {
        self.rx_count[0]
    }

    fn ep_csr(&self, ep: u8, dir: PipeDir) -> EpCsr {
        self.ep[ep as usize][dir_index(dir)]
    }

    fn ep_set(&mut self, ep: u8, dir: PipeDir, bits: EpCsr) {
        self.ops.push(Op::EpSet(ep, dir, bits));
        let csr = &mut self.ep[ep as usize][dir_index(dir)];
        if bits.contains(EpCsr::FLUSH_FIFO) {
            csr.remove(EpCsr::PKT_RDY);
            if dir == PipeDir::Rx {
                self.rx_fifo[ep as usize].clear();
            }
        }
        csr.insert(bits.difference(EP_STROBES));
    }

    fn ep_clear(&mut self, ep: u8, dir: PipeDir, bits: EpCsr) {
        self.ops.push(Op::EpClear(ep, dir, bits));
        self.ep[ep as usize][dir_index(dir)].remove(bits);
    }

    fn ep_rx_count(&self, ep: u8) -> u16 {
        self.rx_count[ep as usize]
    }

    fn configure_fifo(&mut self, ep: u8, dir: PipeDir, layout: FifoLayout) {
        self.fifo_layouts[ep as usize][dir_index(dir)] = Some(layout);
    }

    fn set_max_packet(&mut self, ep: u8, dir: PipeDir, max_pkt: u16, _num_pkt: u8) {
        self.max_packet[ep as usize][dir_index(dir)] = max_pkt;
    }

    fn write_fifo(&mut self, ep: u8, data: &[u8]) {
        self.ops.push(Op::WriteFifo(ep, data.to_vec()));
    }

    fn read_fifo(&mut self, ep: u8, data: &mut [u8]) {
        self.ops.push(Op::ReadFifo(ep, data.len()));
        let fifo = &mut self.rx_fifo[ep as usize];
        for byte in data.iter_mut() {
            *byte = fifo.pop_front().unwrap_or(0);
        }
    }

    fn dma_configure(&mut self, ch: DmaChannel, ctrl: DmaControl) {
        self.dma_control[ch.index()] = Some(ctrl);
    }

    fn dma_set_addr(&mut self, ch: DmaChannel, addr: usize) {
        self.dma_addr[ch.index()] = addr;
    }

    fn dma_addr(&self, ch: DmaChannel) -> usize {
        self.dma_addr[ch.index()]
    }

    fn dma_set_count(&mut self, ch: DmaChannel, count: u32) {
        self.dma_count[ch.index()] = count;
    }

    fn dma_start(&mut self, ch: DmaChannel) {
        self.dma_running[ch.index()] = true;
        self.ops.push(Op::DmaStart(ch.index() as u8, self.dma_count[ch.index()]));
    }

    fn dma_stop(&mut self, ch: DmaChannel) {
        self.dma_running[ch.index()] = false;
        self.ops.push(Op::DmaStop(ch.index() as u8));
    }

    fn read_dma_irq(&mut self) -> u8 {
        core::mem::take(&mut self.dma_irq)
    }

    fn dma_bus_error(&self, ch: DmaChannel) -> bool {
        self.dma_bus_error[ch.index()]
    }

    fn millis(&self) -> u32 {
        self.now
    }

    fn delay_us(&mut self, us: u32) {
        self.ops.push(Op::DelayUs(us));
    }
}

/// A transfer buffer that the test can still look into after handing it to a
/// controller.
pub struct TestBuf {
    pub buf: Buffer,
}

impl TestBuf {
    pub fn zeroed(len: usize) -> Self {
        let mem: &'static mut [u8] = Box::leak(vec![0u8; len].into_boxed_slice());
        Self {
            buf: Buffer::new(mem),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mem: &'static mut [u8] = Box::leak(bytes.to_vec().into_boxed_slice());
        Self {
            buf: Buffer::new(mem),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        // Safety: the controller has reported completion before tests look.
        unsafe { self.buf.slice(0, self.buf.len()) }
    }
}

pub fn channel(index: u8) -> DmaChannel {
    DmaChannel::new(index).unwrap()
}
