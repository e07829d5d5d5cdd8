//! Packet filter
//!
//! Priority-ordered rule chains for the INPUT, OUTPUT, and FORWARD paths.
//! A LOG rule records the packet and evaluation continues; the first other
//! matching rule decides the verdict. Without a match the chain's default
//! policy applies, and a disabled filter short-circuits to ACCEPT.

use alloc::vec::Vec;

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::RwLock;

/// Protocol wildcard.
pub const PROTO_ANY: u8 = 0;
/// ICMP protocol number.
pub const PROTO_ICMP: u8 = 1;
/// TCP protocol number.
pub const PROTO_TCP: u8 = 6;
/// UDP protocol number.
pub const PROTO_UDP: u8 = 17;

/// Traffic direction, doubling as the chain selector.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Traffic addressed to this host.
    Input = 0,
    /// Traffic originated by this host.
    Output = 1,
    /// Routed traffic passing through.
    Forward = 2,
}

/// Verdict of a rule or chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    /// Let the packet pass.
    Accept,
    /// Silently discard.
    Drop,
    /// Discard and signal the sender.
    Reject,
    /// Record the packet and keep evaluating.
    Log,
}

/// A packet as the filter sees it.
#[derive(Debug, Clone, Copy)]
pub struct Packet {
    /// Source IPv4 address (host byte order).
    pub src_ip: u32,
    /// Destination IPv4 address (host byte order).
    pub dst_ip: u32,
    /// Source port (0 when the protocol has none).
    pub src_port: u16,
    /// Destination port (0 when the protocol has none).
    pub dst_port: u16,
    /// IP protocol number.
    pub protocol: u8,
    /// Which path the packet is on.
    pub direction: Direction,
    /// Total length in bytes, for byte counters.
    pub length: u64,
}

/// One filter rule. Address matching is IP-under-mask; a zero port or the
/// ANY protocol matches everything in that dimension.
#[derive(Debug)]
pub struct FilterRule {
    /// Source address pattern.
    pub src_ip: u32,
    /// Source address mask.
    pub src_mask: u32,
    /// Destination address pattern.
    pub dst_ip: u32,
    /// Destination address mask.
    pub dst_mask: u32,
    /// Source port (0 = any).
    pub src_port: u16,
    /// Destination port (0 = any).
    pub dst_port: u16,
    /// Protocol number (PROTO_ANY = any).
    pub protocol: u8,
    /// Verdict when the rule matches.
    pub action: FilterAction,
    /// Direction the rule applies to.
    pub direction: Direction,
    /// Evaluation order within the chain (ascending).
    pub priority: u32,
    packet_count: AtomicU64,
    byte_count: AtomicU64,
}

impl FilterRule {
    /// A rule matching everything in `direction` with the given action and
    /// priority; tighten the public fields afterwards.
    pub fn any(direction: Direction, action: FilterAction, priority: u32) -> Self {
        Self {
            src_ip: 0,
            src_mask: 0,
            dst_ip: 0,
            dst_mask: 0,
            src_port: 0,
            dst_port: 0,
            protocol: PROTO_ANY,
            action,
            direction,
            priority,
            packet_count: AtomicU64::new(0),
            byte_count: AtomicU64::new(0),
        }
    }

    /// Whether the rule matches `packet`.
    pub fn matches(&self, packet: &Packet) -> bool {
        if self.direction != packet.direction {
            return false;
        }
        if self.protocol != PROTO_ANY && self.protocol != packet.protocol {
            return false;
        }
        if packet.src_ip & self.src_mask != self.src_ip & self.src_mask {
            return false;
        }
        if packet.dst_ip & self.dst_mask != self.dst_ip & self.dst_mask {
            return false;
        }
        if self.src_port != 0 && self.src_port != packet.src_port {
            return false;
        }
        if self.dst_port != 0 && self.dst_port != packet.dst_port {
            return false;
        }
        true
    }

    /// (packets, bytes) matched so far.
    pub fn counters(&self) -> (u64, u64) {
        (
            self.packet_count.load(Ordering::Relaxed),
            self.byte_count.load(Ordering::Relaxed),
        )
    }

    fn account(&self, packet: &Packet) {
        self.packet_count.fetch_add(1, Ordering::Relaxed);
        self.byte_count.fetch_add(packet.length, Ordering::Relaxed);
    }
}

/// A priority-ordered rule chain.
pub struct FilterChain {
    /// Chain name for logs.
    pub name: &'static str,
    /// Verdict when no rule matches.
    pub default_policy: FilterAction,
    rules: RwLock<Vec<FilterRule>>,
}

impl FilterChain {
    /// An empty chain with the given default policy.
    pub const fn new(name: &'static str, default_policy: FilterAction) -> Self {
        Self {
            name,
            default_policy,
            rules: RwLock::new(Vec::new()),
        }
    }

    /// Insert a rule, keeping the chain sorted by ascending priority.
    /// Equal-priority rules keep insertion order.
    pub fn insert(&self, rule: FilterRule) {
        let mut rules = self.rules.write();
        let index = rules.partition_point(|r| r.priority <= rule.priority);
        rules.insert(index, rule);
    }

    /// Number of rules in the chain.
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Whether the chain has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Priorities in evaluation order (diagnostics and tests).
    pub fn priorities(&self) -> Vec<u32> {
        self.rules.read().iter().map(|r| r.priority).collect()
    }

    /// Evaluate `packet` against the chain.
    pub fn evaluate(&self, packet: &Packet) -> FilterAction {
        let rules = self.rules.read();
        for rule in rules.iter() {
            if !rule.matches(packet) {
                continue;
            }
            rule.account(packet);
            match rule.action {
                FilterAction::Log => {
                    log::info!(
                        target: "netfilter",
                        "{}: LOG {}:{} -> {}:{} proto {}",
                        self.name,
                        packet.src_ip,
                        packet.src_port,
                        packet.dst_ip,
                        packet.dst_port,
                        packet.protocol
                    );
                }
                action => return action,
            }
        }
        self.default_policy
    }

    /// (packets, bytes) for the rule at `index` in evaluation order.
    pub fn rule_counters(&self, index: usize) -> Option<(u64, u64)> {
        self.rules.read().get(index).map(|r| r.counters())
    }
}

/// The packet filter: one chain per direction plus the global enable gate.
pub struct Netfilter {
    enabled: AtomicBool,
    /// Chain for inbound traffic.
    pub input: FilterChain,
    /// Chain for outbound traffic.
    pub output: FilterChain,
    /// Chain for forwarded traffic.
    pub forward: FilterChain,
}

impl Netfilter {
    /// A disabled filter with ACCEPT default policies.
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            input: FilterChain::new("INPUT", FilterAction::Accept),
            output: FilterChain::new("OUTPUT", FilterAction::Accept),
            forward: FilterChain::new("FORWARD", FilterAction::Accept),
        }
    }

    /// Turn filtering on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Whether filtering is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// The chain handling `direction`.
    pub fn chain(&self, direction: Direction) -> &FilterChain {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
            Direction::Forward => &self.forward,
        }
    }

    /// Filter a packet. A disabled filter accepts everything.
    pub fn filter_packet(&self, packet: &Packet) -> FilterAction {
        if !self.is_enabled() {
            return FilterAction::Accept;
        }
        self.chain(packet.direction).evaluate(packet)
    }
}

impl Default for Netfilter {
    fn default() -> Self {
        Self::new()
    }
}

/// The system packet filter.
pub static NETFILTER: Netfilter = Netfilter::new();

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_input(dst_port: u16) -> Packet {
        Packet {
            src_ip: 0x0A00_0001,
            dst_ip: 0x0A00_0002,
            src_port: 40000,
            dst_port,
            protocol: PROTO_TCP,
            direction: Direction::Input,
            length: 120,
        }
    }

    #[test]
    fn drop_rule_beats_default_accept() {
        let filter = Netfilter::new();
        filter.set_enabled(true);

        let mut rule = FilterRule::any(Direction::Input, FilterAction::Drop, 50);
        rule.protocol = PROTO_TCP;
        rule.dst_port = 22;
        filter.input.insert(rule);

        assert_eq!(filter.filter_packet(&tcp_input(22)), FilterAction::Drop);
        assert_eq!(filter.filter_packet(&tcp_input(80)), FilterAction::Accept);
        assert_eq!(filter.input.rule_counters(0), Some((1, 120)));
    }

    #[test]
    fn disabled_filter_accepts_everything() {
        let filter = Netfilter::new();
        let mut rule = FilterRule::any(Direction::Input, FilterAction::Drop, 1);
        rule.protocol = PROTO_TCP;
        filter.input.insert(rule);
        assert_eq!(filter.filter_packet(&tcp_input(22)), FilterAction::Accept);
    }

    #[test]
    fn insertion_keeps_ascending_priority() {
        let chain = FilterChain::new("test", FilterAction::Accept);
        for priority in [300u32, 10, 150, 70, 70, 500, 1] {
            chain.insert(FilterRule::any(Direction::Input, FilterAction::Drop, priority));
        }
        let priorities = chain.priorities();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
        assert_eq!(priorities[0], 1);
        assert_eq!(priorities.last(), Some(&500));
    }

    #[test]
    fn lower_priority_rule_wins() {
        let chain = FilterChain::new("test", FilterAction::Accept);
        let mut reject = FilterRule::any(Direction::Input, FilterAction::Reject, 200);
        reject.dst_port = 22;
        chain.insert(reject);
        let mut drop = FilterRule::any(Direction::Input, FilterAction::Drop, 100);
        drop.dst_port = 22;
        chain.insert(drop);

        assert_eq!(chain.evaluate(&tcp_input(22)), FilterAction::Drop);
        // The losing rule was never reached.
        assert_eq!(chain.rule_counters(1), Some((0, 0)));
    }

    #[test]
    fn log_rule_continues_evaluation() {
        let chain = FilterChain::new("test", FilterAction::Accept);
        let mut log_rule = FilterRule::any(Direction::Input, FilterAction::Log, 10);
        log_rule.dst_port = 22;
        chain.insert(log_rule);
        let mut drop = FilterRule::any(Direction::Input, FilterAction::Drop, 20);
        drop.dst_port = 22;
        chain.insert(drop);

        assert_eq!(chain.evaluate(&tcp_input(22)), FilterAction::Drop);
        // Both the LOG rule and the DROP rule counted the packet.
        assert_eq!(chain.rule_counters(0), Some((1, 120)));
        assert_eq!(chain.rule_counters(1), Some((1, 120)));
    }

    #[test]
    fn masked_address_matching() {
        let chain = FilterChain::new("test", FilterAction::Accept);
        // Drop everything from 10.0.0.0/8.
        let mut rule = FilterRule::any(Direction::Input, FilterAction::Drop, 10);
        rule.src_ip = 0x0A00_0000;
        rule.src_mask = 0xFF00_0000;
        chain.insert(rule);

        let mut from_ten = tcp_input(80);
        from_ten.src_ip = 0x0A01_0203;
        assert_eq!(chain.evaluate(&from_ten), FilterAction::Drop);

        let mut from_eleven = tcp_input(80);
        from_eleven.src_ip = 0x0B01_0203;
        assert_eq!(chain.evaluate(&from_eleven), FilterAction::Accept);
    }

    #[test]
    fn wrong_direction_never_matches() {
        let chain = FilterChain::new("test", FilterAction::Accept);
        chain.insert(FilterRule::any(Direction::Output, FilterAction::Drop, 1));
        assert_eq!(chain.evaluate(&tcp_input(22)), FilterAction::Accept);
    }
}
