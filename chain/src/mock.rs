//! In-memory chain used by the scenario tests: preloaded blocks, a
//! programmable tip, and scriptable outbound-send results.

use std::collections::{HashMap, VecDeque};

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{Attachment, Block, Chain, ChainClient, ChainTx, SendOutcome};

/// What the next `send_tx` call should do.
#[derive(Debug, Clone)]
pub enum ScriptedSend {
    /// Accept and mine the tx at the current tip.
    Accept,
    /// Accept but leave the tx unmined.
    AcceptUnmined,
    /// Node-level rejection.
    Reject(String),
    /// Transport failure (submission state unknown).
    Fail(String),
}

/// One recorded outbound submission.
#[derive(Debug, Clone)]
pub struct SentTx {
    pub to: String,
    pub amount: f64,
    pub txid: Option<String>,
}

#[derive(Default)]
struct State {
    tip: u64,
    balance: u128,
    blocks: HashMap<u64, Block>,
    mined: HashMap<String, u64>,
    sends: Vec<SentTx>,
    script: VecDeque<ScriptedSend>,
    issued: u64,
}

pub struct MockChain {
    chain: Chain,
    prefix: String,
    state: Mutex<State>,
}

impl MockChain {
    pub fn new(chain: Chain, prefix: &str) -> Self {
        Self {
            chain,
            prefix: prefix.to_owned(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn set_tip(&self, tip: u64) {
        self.state.lock().tip = tip;
    }

    pub fn advance_tip(&self, blocks: u64) {
        self.state.lock().tip += blocks;
    }

    pub fn set_balance(&self, balance: u128) {
        self.state.lock().balance = balance;
    }

    pub fn push_block(&self, block: Block) {
        let mut state = self.state.lock();
        state.tip = state.tip.max(block.height);
        state.blocks.insert(block.height, block);
    }

    pub fn mine(&self, txid: &str, height: u64) {
        self.state.lock().mined.insert(txid.to_owned(), height);
    }

    /// Queue a behavior for the next `send_tx`; unscripted sends accept
    /// and mine.
    pub fn script_send(&self, send: ScriptedSend) {
        self.state.lock().script.push_back(send);
    }

    pub fn sends(&self) -> Vec<SentTx> {
        self.state.lock().sends.clone()
    }

    /// A well-formed address for this mock's chain.
    pub fn address(&self, tag: &str) -> String {
        format!("{}{}", self.prefix, tag)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn current_block(&self) -> anyhow::Result<u64> {
        Ok(self.state.lock().tip)
    }

    async fn current_balance(&self) -> anyhow::Result<u128> {
        Ok(self.state.lock().balance)
    }

    async fn get_block(&self, height: u64) -> anyhow::Result<Block> {
        let state = self.state.lock();
        Ok(state.blocks.get(&height).cloned().unwrap_or(Block {
            height,
            transactions: Vec::new(),
        }))
    }

    fn validate_address(&self, address: &str) -> bool {
        address.starts_with(&self.prefix)
    }

    fn normalize_address(&self, address: &str) -> String {
        address.to_lowercase()
    }

    async fn get_new_address(&self) -> anyhow::Result<String> {
        let mut state = self.state.lock();
        state.issued += 1;
        Ok(format!("{}issued{}", self.prefix, state.issued))
    }

    async fn send_tx(&self, to: &str, amount: f64) -> anyhow::Result<SendOutcome> {
        let mut state = self.state.lock();
        let scripted = state.script.pop_front().unwrap_or(ScriptedSend::Accept);
        let txid = format!("{}-tx-{}", self.chain.as_str().to_lowercase(), state.sends.len());

        match scripted {
            ScriptedSend::Accept => {
                let tip = state.tip;
                state.mined.insert(txid.clone(), tip);
                state.sends.push(SentTx {
                    to: to.to_owned(),
                    amount,
                    txid: Some(txid.clone()),
                });
                Ok(SendOutcome::Accepted { txid })
            }
            ScriptedSend::AcceptUnmined => {
                state.sends.push(SentTx {
                    to: to.to_owned(),
                    amount,
                    txid: Some(txid.clone()),
                });
                Ok(SendOutcome::Accepted { txid })
            }
            ScriptedSend::Reject(reason) => {
                state.sends.push(SentTx {
                    to: to.to_owned(),
                    amount,
                    txid: None,
                });
                Ok(SendOutcome::Rejected { reason })
            }
            ScriptedSend::Fail(reason) => {
                state.sends.push(SentTx {
                    to: to.to_owned(),
                    amount,
                    txid: None,
                });
                Err(anyhow!("{}", reason))
            }
        }
    }

    fn attached_target(&self, tx: &ChainTx) -> Attachment {
        match tx.attachment.as_deref() {
            Some(target) => Attachment::Target(target.to_owned()),
            None => Attachment::Missing,
        }
    }

    async fn find_tx_height(&self, txid: &str) -> anyhow::Result<Option<u64>> {
        Ok(self.state.lock().mined.get(txid).copied())
    }
}
