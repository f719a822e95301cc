//! Decides whether a raced reply is credible.
//!
//! The first reply to arrive is judged by the rule for the group that produced it. A
//! suspect reply is held while the other group's reply is awaited; that second reply is
//! accepted whatever its verdict, so at most one cross-check happens per request.

use crate::engine::Rules;
use crate::resolver::{Answer, TrustClass};
use hickory_server::proto::op::Message;
use hickory_server::proto::rr::{Name, RData, Record};
use std::net::IpAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// The record kinds that matter for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Address(IpAddr),
    CanonicalName(Name),
    Other,
}

impl RecordKind {
    pub fn of(record: &Record) -> Self {
        match record.data() {
            RData::A(a) => RecordKind::Address(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) => RecordKind::Address(IpAddr::V6(aaaa.0)),
            RData::CNAME(cname) => RecordKind::CanonicalName(cname.0.clone()),
            _ => RecordKind::Other,
        }
    }
}

/// What a reply's answer section says, for classification purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Representative {
    /// First address record in the answer section.
    Address(IpAddr),
    /// An alias chain with no terminal address.
    Alias(Name),
    /// Empty answers or a leading record of another kind.
    Opaque,
}

/// Scans the answer section in order for the record that decides credibility.
pub fn representative(reply: &Message) -> Representative {
    let answers = reply.answers();
    for (i, record) in answers.iter().enumerate() {
        match RecordKind::of(record) {
            RecordKind::Address(ip) => return Representative::Address(ip),
            RecordKind::CanonicalName(target) => {
                if i + 1 < answers.len() {
                    continue;
                }
                return Representative::Alias(target);
            }
            RecordKind::Other => return Representative::Opaque,
        }
    }
    Representative::Opaque
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Suspect,
}

/// The reply chosen for a request.
#[derive(Debug, Clone)]
pub struct Classified {
    pub answer: Answer,
    /// Which group's channel delivered the answer.
    pub origin: TrustClass,
    /// The answer was suspect and served only because the other group never replied.
    pub fallback: bool,
}

enum State {
    AwaitFirst,
    AwaitFallback { held: Answer, origin: TrustClass },
    Done(Option<Classified>),
}

/// Which hop of the cross-check a reply is judged at.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Hop {
    First,
    Second,
}

pub struct AnswerClassifier {
    rules: Rules,
    bidirectional: bool,
}

impl AnswerClassifier {
    pub fn new(rules: Rules, bidirectional: bool) -> Self {
        Self {
            rules,
            bidirectional,
        }
    }

    /// Judges one address by the rule of the group it came from.
    ///
    /// Lookup errors are logged and count as "not listed".
    pub fn judge(&self, origin: TrustClass, ip: IpAddr, question: &str) -> Verdict {
        if self.in_ip_blacklist(ip, question) {
            debug!(question, answer = %ip, "Answer hit blacklist");
            return Verdict::Suspect;
        }

        match origin {
            TrustClass::Untrusted => {
                if self.is_domestic(ip, question) {
                    debug!(question, answer = %ip, "Answer is domestic. Use it.");
                    Verdict::Accept
                } else {
                    debug!(question, answer = %ip, "Answer is foreign via untrusted path");
                    Verdict::Suspect
                }
            }
            TrustClass::Trusted => {
                if !self.bidirectional {
                    debug!(question, answer = %ip, "Answer is trusted. Use it.");
                    return Verdict::Accept;
                }
                if !self.is_domestic(ip, question) {
                    debug!(question, answer = %ip, "Answer is trusted and foreign. Use it.");
                    Verdict::Accept
                } else {
                    debug!(question, answer = %ip, "Answer may not be the nearest");
                    Verdict::Suspect
                }
            }
        }
    }

    fn in_ip_blacklist(&self, ip: IpAddr, question: &str) -> bool {
        self.rules.ip_blacklist.contains(ip).unwrap_or_else(|e| {
            error!(question, answer = %ip, "IP blacklist lookup failed: {:#}", e);
            false
        })
    }

    fn is_domestic(&self, ip: IpAddr, question: &str) -> bool {
        self.rules.domestic.contains(ip).unwrap_or_else(|e| {
            error!(question, answer = %ip, "Domestic table lookup failed: {:#}", e);
            false
        })
    }

    /// Waits for the first reply from either group and classifies it, consulting the
    /// other group at most once.
    ///
    /// Returns `None` when neither group produced a reply before both gave up or `root`
    /// was cancelled.
    pub async fn resolve(
        &self,
        question: &str,
        trusted: &mut mpsc::Receiver<Answer>,
        untrusted: &mut mpsc::Receiver<Answer>,
        root: &CancellationToken,
    ) -> Option<Classified> {
        let mut state = State::AwaitFirst;
        loop {
            state = match state {
                State::AwaitFirst => match first_reply(trusted, untrusted, root).await {
                    Some((answer, origin)) => self.step(question, answer, origin, Hop::First),
                    None => State::Done(None),
                },
                State::AwaitFallback { held, origin } => {
                    let other = match origin {
                        TrustClass::Trusted => &mut *untrusted,
                        TrustClass::Untrusted => &mut *trusted,
                    };
                    let second = tokio::select! {
                        biased;
                        answer = other.recv() => answer,
                        _ = root.cancelled() => None,
                    };
                    match second {
                        Some(answer) => self.step(question, answer, origin.other(), Hop::Second),
                        None => {
                            warn!(
                                question,
                                server = %held.server,
                                "No {} reply. Use this as fallback.",
                                origin.other()
                            );
                            State::Done(Some(Classified {
                                answer: held,
                                origin,
                                fallback: true,
                            }))
                        }
                    }
                }
                State::Done(result) => return result,
            };
        }
    }

    fn step(&self, question: &str, answer: Answer, origin: TrustClass, hop: Hop) -> State {
        let accept = State::Done(Some(Classified {
            answer: answer.clone(),
            origin,
            fallback: false,
        }));

        match representative(&answer.reply) {
            Representative::Address(ip) => {
                if self.judge(origin, ip, question) == Verdict::Accept {
                    return accept;
                }
                if hop == Hop::Second {
                    debug!(question, answer = %ip, "Second opinion is suspect too. Use it.");
                    return accept;
                }
                State::AwaitFallback {
                    held: answer,
                    origin,
                }
            }
            Representative::Alias(target) => {
                debug!(question, "CNAME to {}", target);
                accept
            }
            Representative::Opaque => accept,
        }
    }
}

/// Waits for the first reply from either group.
///
/// A closed channel means that group is exhausted. Returns `None` once both are
/// exhausted or `root` is cancelled.
async fn first_reply(
    trusted: &mut mpsc::Receiver<Answer>,
    untrusted: &mut mpsc::Receiver<Answer>,
    root: &CancellationToken,
) -> Option<(Answer, TrustClass)> {
    let mut trusted_open = true;
    let mut untrusted_open = true;
    while trusted_open || untrusted_open {
        tokio::select! {
            biased;
            reply = untrusted.recv(), if untrusted_open => match reply {
                Some(answer) => return Some((answer, TrustClass::Untrusted)),
                None => untrusted_open = false,
            },
            reply = trusted.recv(), if trusted_open => match reply {
                Some(answer) => return Some((answer, TrustClass::Trusted)),
                None => trusted_open = false,
            },
            _ = root.cancelled() => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AddressMatcher, CidrTable, DomainList};
    use crate::resolver::race::tests::{reply_with, request, servers};
    use crate::resolver::Resolver;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingMatcher {
        inner: CidrTable,
        calls: Arc<AtomicUsize>,
    }

    impl AddressMatcher for CountingMatcher {
        fn contains(&self, ip: IpAddr) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.contains(ip)
        }
    }

    struct FailingMatcher;

    impl AddressMatcher for FailingMatcher {
        fn contains(&self, _ip: IpAddr) -> anyhow::Result<bool> {
            Err(anyhow!("table unavailable"))
        }
    }

    fn rules(domestic: &[&str], blacklist: &[&str]) -> Rules {
        Rules {
            domain_blacklist: Arc::new(DomainList::default()),
            domain_polluted: Arc::new(DomainList::default()),
            ip_blacklist: Arc::new(CidrTable::new(blacklist).unwrap()),
            domestic: Arc::new(CidrTable::new(domestic).unwrap()),
        }
    }

    fn answer(server: &Resolver, records: &[&'static str]) -> Answer {
        Answer {
            reply: reply_with(&request("example.com."), records),
            server: server.clone(),
            rtt: Duration::from_millis(5),
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn first_ip(reply: &Message) -> IpAddr {
        match representative(reply) {
            Representative::Address(ip) => ip,
            other => panic!("expected address, got {:?}", other),
        }
    }

    #[test]
    fn test_representative_first_address_wins() {
        let req = request("example.com.");
        let reply = reply_with(&req, &["cname:a.example.net.", "1.2.3.4", "5.6.7.8"]);
        assert_eq!(representative(&reply), Representative::Address(ip("1.2.3.4")));

        let reply = reply_with(&req, &["2001:db8::1"]);
        assert_eq!(
            representative(&reply),
            Representative::Address(ip("2001:db8::1"))
        );
    }

    #[test]
    fn test_representative_alias_and_opaque() {
        let req = request("example.com.");
        let reply = reply_with(&req, &["cname:a.example.net.", "cname:b.example.net."]);
        assert_eq!(
            representative(&reply),
            Representative::Alias(Name::from_ascii("b.example.net.").unwrap())
        );
        assert_eq!(representative(&reply_with(&req, &[])), Representative::Opaque);
    }

    #[test]
    fn test_untrusted_rule() {
        let classifier =
            AnswerClassifier::new(rules(&["36.0.0.0/10"], &["36.1.1.1"]), true);
        let q = "example.com. A";
        assert_eq!(classifier.judge(TrustClass::Untrusted, ip("36.0.0.1"), q), Verdict::Accept);
        assert_eq!(classifier.judge(TrustClass::Untrusted, ip("1.2.3.4"), q), Verdict::Suspect);
        assert_eq!(classifier.judge(TrustClass::Untrusted, ip("36.1.1.1"), q), Verdict::Suspect);
    }

    #[test]
    fn test_trusted_rule() {
        let q = "example.com. A";
        let bidirectional = AnswerClassifier::new(rules(&["36.0.0.0/10"], &["9.9.9.9"]), true);
        assert_eq!(bidirectional.judge(TrustClass::Trusted, ip("5.6.7.8"), q), Verdict::Accept);
        assert_eq!(bidirectional.judge(TrustClass::Trusted, ip("36.0.0.1"), q), Verdict::Suspect);
        assert_eq!(bidirectional.judge(TrustClass::Trusted, ip("9.9.9.9"), q), Verdict::Suspect);

        let oneway = AnswerClassifier::new(rules(&["36.0.0.0/10"], &["9.9.9.9"]), false);
        assert_eq!(oneway.judge(TrustClass::Trusted, ip("36.0.0.1"), q), Verdict::Accept);
        assert_eq!(oneway.judge(TrustClass::Trusted, ip("9.9.9.9"), q), Verdict::Suspect);
    }

    #[test]
    fn test_oneway_trusted_skips_domestic_lookup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut r = rules(&[], &[]);
        r.domestic = Arc::new(CountingMatcher {
            inner: CidrTable::new(["36.0.0.0/10"]).unwrap(),
            calls: calls.clone(),
        });
        let classifier = AnswerClassifier::new(r, false);
        assert_eq!(
            classifier.judge(TrustClass::Trusted, ip("36.0.0.1"), "q"),
            Verdict::Accept
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lookup_errors_fail_open() {
        let mut r = rules(&[], &[]);
        r.ip_blacklist = Arc::new(FailingMatcher);
        r.domestic = Arc::new(FailingMatcher);
        let classifier = AnswerClassifier::new(r, true);
        // Not blacklisted, not domestic.
        assert_eq!(classifier.judge(TrustClass::Trusted, ip("36.0.0.1"), "q"), Verdict::Accept);
        assert_eq!(classifier.judge(TrustClass::Untrusted, ip("36.0.0.1"), "q"), Verdict::Suspect);
    }

    #[tokio::test]
    async fn test_alias_only_reply_skips_lookups() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut r = rules(&[], &[]);
        r.domestic = Arc::new(CountingMatcher {
            inner: CidrTable::default(),
            calls: calls.clone(),
        });
        r.ip_blacklist = Arc::new(CountingMatcher {
            inner: CidrTable::default(),
            calls: calls.clone(),
        });
        let classifier = AnswerClassifier::new(r, true);
        let untrusted = servers(1, TrustClass::Untrusted);

        let (_ttx, mut trx) = mpsc::channel(1);
        let (utx, mut urx) = mpsc::channel(1);
        let sent = answer(&untrusted[0], &["cname:cdn.example.net."]);
        utx.try_send(sent.clone()).unwrap();

        let root = CancellationToken::new();
        let result = classifier.resolve("q", &mut trx, &mut urx, &root).await.unwrap();
        assert_eq!(result.answer.reply, sent.reply);
        assert!(!result.fallback);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_suspect_untrusted_waits_for_trusted() {
        let classifier = AnswerClassifier::new(rules(&["36.0.0.0/10"], &[]), true);
        let trusted = servers(1, TrustClass::Trusted);
        let untrusted = servers(1, TrustClass::Untrusted);

        let (ttx, mut trx) = mpsc::channel(1);
        let (utx, mut urx) = mpsc::channel(1);
        utx.try_send(answer(&untrusted[0], &["1.2.3.4"])).unwrap();
        let late = answer(&trusted[0], &["5.6.7.8"]);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ttx.send(late).await.unwrap();
        });

        let root = CancellationToken::new();
        let result = classifier.resolve("q", &mut trx, &mut urx, &root).await.unwrap();
        assert_eq!(first_ip(&result.answer.reply), ip("5.6.7.8"));
        assert_eq!(result.origin, TrustClass::Trusted);
        assert!(!result.fallback);
    }

    #[tokio::test]
    async fn test_second_opinion_is_final() {
        // Trusted answer is domestic (suspect in bidirectional mode); the untrusted
        // answer is foreign (also suspect) but is accepted without bouncing back.
        let classifier = AnswerClassifier::new(rules(&["36.0.0.0/10"], &[]), true);
        let trusted = servers(1, TrustClass::Trusted);
        let untrusted = servers(1, TrustClass::Untrusted);

        let (ttx, mut trx) = mpsc::channel(1);
        let (utx, mut urx) = mpsc::channel(1);
        ttx.try_send(answer(&trusted[0], &["36.0.0.1"])).unwrap();
        let root = CancellationToken::new();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            utx.send(answer(&untrusted[0], &["1.2.3.4"])).await.unwrap();
        });

        let result = classifier.resolve("q", &mut trx, &mut urx, &root).await.unwrap();
        assert_eq!(first_ip(&result.answer.reply), ip("1.2.3.4"));
        assert_eq!(result.origin, TrustClass::Untrusted);
        assert!(!result.fallback);
        drop(ttx);
    }

    #[tokio::test]
    async fn test_fallback_when_other_group_cancelled() {
        let classifier = AnswerClassifier::new(rules(&["36.0.0.0/10"], &[]), true);
        let trusted = servers(1, TrustClass::Trusted);

        let (ttx, mut trx) = mpsc::channel(1);
        // Untrusted sender stays open so only root cancellation ends the wait.
        let (_utx, mut urx) = mpsc::channel::<Answer>(1);
        ttx.try_send(answer(&trusted[0], &["36.0.0.1"])).unwrap();

        let root = CancellationToken::new();
        let canceller = root.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = classifier.resolve("q", &mut trx, &mut urx, &root).await.unwrap();
        assert_eq!(first_ip(&result.answer.reply), ip("36.0.0.1"));
        assert!(result.fallback);
        assert_eq!(result.origin, TrustClass::Trusted);
    }

    #[tokio::test]
    async fn test_fallback_when_other_group_exhausted() {
        let classifier = AnswerClassifier::new(rules(&[], &[]), true);
        let untrusted = servers(1, TrustClass::Untrusted);

        let (ttx, mut trx) = mpsc::channel::<Answer>(1);
        let (utx, mut urx) = mpsc::channel(1);
        utx.try_send(answer(&untrusted[0], &["1.2.3.4"])).unwrap();
        drop(ttx);

        let root = CancellationToken::new();
        let result = classifier.resolve("q", &mut trx, &mut urx, &root).await.unwrap();
        assert!(result.fallback);
        assert_eq!(result.origin, TrustClass::Untrusted);
    }

    #[tokio::test]
    async fn test_nothing_arrives() {
        let classifier = AnswerClassifier::new(rules(&[], &[]), true);
        let (ttx, mut trx) = mpsc::channel::<Answer>(1);
        let (utx, mut urx) = mpsc::channel::<Answer>(1);
        drop((ttx, utx));

        let root = CancellationToken::new();
        assert!(classifier
            .resolve("q", &mut trx, &mut urx, &root)
            .await
            .is_none());
    }
}
