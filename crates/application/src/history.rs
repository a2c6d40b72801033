//! 按用户划分的内存历史记录
//!
//! 只由消息中心的事件循环持有和修改。每个用户一个定长环形缓冲，
//! 超出容量时淘汰最旧的消息；完整历史保存在持久化存储中。

use std::collections::{HashMap, HashSet, VecDeque};

use domain::{DirectMessage, MessageId, Username};

/// 合并种子时识别同一条消息的键。
///
/// 消息标识可由客户端提供，单凭它不能区分两条消息；
/// 发送者来自认证身份，时间戳由服务端盖上（按存储精度取微秒）。
type MergeKey<'a> = (&'a MessageId, &'a Username, i64);

fn merge_key(message: &DirectMessage) -> MergeKey<'_> {
    (
        message.id(),
        message.sender(),
        message.timestamp().timestamp_micros(),
    )
}

pub struct HistoryBook {
    capacity: usize,
    entries: HashMap<Username, VecDeque<DirectMessage>>,
    hydrated: HashSet<Username>,
}

impl HistoryBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            hydrated: HashSet::new(),
        }
    }

    /// 追加一条消息，不去重
    pub fn append(&mut self, username: &Username, message: DirectMessage) {
        let queue = self.entries.entry(username.clone()).or_default();
        queue.push_back(message);
        while queue.len() > self.capacity {
            queue.pop_front();
        }
    }

    /// 按插入顺序返回该用户的全部历史
    pub fn replay(&self, username: &Username) -> Vec<DirectMessage> {
        self.entries
            .get(username)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 用持久化存储中的历史填充该用户的缓冲，每个用户只生效一次。
    ///
    /// 空种子不计入（存储暂时不可用时下次加入会重试）。种子中与内存里
    /// 同一发送者、同一标识、同一时间戳的消息只保留一份，种子排在已有消息之前。
    pub fn hydrate(&mut self, username: &Username, seed: Vec<DirectMessage>) {
        if seed.is_empty() || !self.hydrated.insert(username.clone()) {
            return;
        }

        let existing = self.entries.remove(username).unwrap_or_default();
        let known: HashSet<MergeKey<'_>> = existing.iter().map(merge_key).collect();

        let mut merged: VecDeque<DirectMessage> = seed
            .into_iter()
            .filter(|message| !known.contains(&merge_key(message)))
            .collect();
        merged.extend(existing.iter().cloned());

        while merged.len() > self.capacity {
            merged.pop_front();
        }
        self.entries.insert(username.clone(), merged);
    }
}
