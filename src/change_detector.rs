use tracing::trace;

use crate::fingerprint::Fingerprint;

/// 默认汉明距离阈值
pub const DEFAULT_CHANGE_THRESHOLD: u32 = 12;

/// 判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// 新的一页
    Accept,
    /// 与上一页相同
    Reject,
}

/// 换页检测器
///
/// 只和“最后一次被接受”的指纹比较，不使用滑动窗口：
/// 每一步都低于阈值的缓慢渐变会一直累积而不触发换页。
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    threshold: u32,
    last_accepted: Option<Fingerprint>,
}

impl ChangeDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            last_accepted: None,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn last_accepted(&self) -> Option<Fingerprint> {
        self.last_accepted
    }

    /// 第一次观察总是接受；之后距离严格大于阈值才接受
    pub fn evaluate(&mut self, fingerprint: Fingerprint) -> Decision {
        let decision = match self.last_accepted {
            None => Decision::Accept,
            Some(last) => {
                let distance = fingerprint.hamming_distance(&last);
                trace!(distance, threshold = self.threshold, "指纹距离");
                if distance > self.threshold {
                    Decision::Accept
                } else {
                    Decision::Reject
                }
            }
        };

        if decision == Decision::Accept {
            self.last_accepted = Some(fingerprint);
        }
        decision
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_THRESHOLD)
    }
}
