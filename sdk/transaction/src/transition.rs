//! State-transition rules
//!
//! Pure functions shared by the operator (which applies them to a working
//! copy of rollup state) and by the batch circuit (which re-derives every
//! post-state from its pre-state). Nothing here touches storage.
//!
//! A transaction touches one or two accounts. [`touched_addresses`] lists
//! them (sender first); [`apply`] maps their pre-states, in that order, to
//! post-states.

use kestrel_account::{Account, Address, Balance, BalanceKind};
use kestrel_crypto::EncryptedBalance;

use crate::{ConfidentialTransfer, DepositEvent, SignedTransfer, Transaction, ValidationError};

/// Accounts touched by `tx`, sender first, without duplicates.
pub fn touched_addresses(tx: &Transaction) -> Vec<Address> {
    match tx {
        Transaction::Deposit(d) => vec![d.address],
        Transaction::Transfer(t) => dedup_pair(t.data.sender, t.data.recipient),
        Transaction::ConfidentialTransfer(c) => dedup_pair(c.sender, c.recipient),
    }
}

fn dedup_pair(a: Address, b: Address) -> Vec<Address> {
    if a == b { vec![a] } else { vec![a, b] }
}

/// Stateless authorization checks.
///
/// Signed transfers must carry a valid rollup-curve signature from the
/// sender. Confidential transfers are authorized by their proof, which
/// needs the sender's current ciphertext and is checked by the caller.
pub fn verify_authorization(tx: &Transaction) -> Result<(), ValidationError> {
    for address in touched_addresses(tx) {
        address
            .public_key()
            .map_err(|_| ValidationError::malformed(format!("address {address} is not a curve point")))?;
    }
    match tx {
        Transaction::Deposit(_) => Ok(()),
        Transaction::Transfer(t) => {
            if t.signature_valid() {
                Ok(())
            } else {
                Err(ValidationError::BadSignature)
            }
        }
        Transaction::ConfidentialTransfer(c) => {
            if c.proof_of_well_formedness.is_empty() {
                Err(ValidationError::BadSignature)
            } else {
                Ok(())
            }
        }
    }
}

/// Post-states of the touched accounts.
///
/// `before[i]` is the pre-state of `touched_addresses(tx)[i]`, `None` when
/// the account does not exist yet. Authorization is assumed checked.
pub fn apply(tx: &Transaction, before: &[Option<Account>]) -> Result<Vec<Account>, ValidationError> {
    let touched = touched_addresses(tx);
    if before.len() != touched.len() {
        return Err(ValidationError::malformed(format!(
            "expected {} pre-states, got {}",
            touched.len(),
            before.len()
        )));
    }
    for (address, account) in touched.iter().zip(before) {
        if let Some(account) = account {
            if account.address != *address {
                return Err(ValidationError::malformed("pre-state address mismatch"));
            }
        }
    }

    match tx {
        Transaction::Deposit(d) => apply_deposit(d, before[0]).map(|a| vec![a]),
        Transaction::Transfer(t) => apply_transfer(t, before),
        Transaction::ConfidentialTransfer(c) => apply_confidential(c, before),
    }
}

fn apply_deposit(deposit: &DepositEvent, before: Option<Account>) -> Result<Account, ValidationError> {
    let mut account = before.unwrap_or_else(|| Account::empty(deposit.address, deposit.kind));
    credit(&mut account, deposit.amount)?;
    Ok(account)
}

fn apply_transfer(
    transfer: &SignedTransfer,
    before: &[Option<Account>],
) -> Result<Vec<Account>, ValidationError> {
    let data = &transfer.data;
    let mut sender = before[0].ok_or(ValidationError::UnknownAddress(data.sender))?;

    let Balance::Plain(available) = sender.balance else {
        return Err(ValidationError::malformed("plain transfer from an encrypted account"));
    };
    check_nonce(&sender, data.nonce)?;
    if data.amount > available {
        return Err(ValidationError::InsufficientBalance {
            available,
            required: data.amount,
        });
    }

    sender.nonce = next_nonce(&sender)?;
    if data.sender == data.recipient {
        return Ok(vec![sender]);
    }

    sender.balance = Balance::Plain(available - data.amount);
    let mut recipient = before[1].unwrap_or_else(|| Account::empty(data.recipient, BalanceKind::Plain));
    credit(&mut recipient, data.amount)?;

    Ok(vec![sender, recipient])
}

fn apply_confidential(
    transfer: &ConfidentialTransfer,
    before: &[Option<Account>],
) -> Result<Vec<Account>, ValidationError> {
    if transfer.sender == transfer.recipient {
        return Err(ValidationError::malformed("confidential transfer to self"));
    }
    let mut sender = before[0].ok_or(ValidationError::UnknownAddress(transfer.sender))?;
    let Balance::Encrypted(sender_before) = sender.balance else {
        return Err(ValidationError::malformed("confidential transfer from a plain account"));
    };
    check_nonce(&sender, transfer.nonce)?;

    let derived_after = sender_before
        .sub(&transfer.sender_encrypted_amount)
        .map_err(|e| ValidationError::malformed(format!("sender amount: {e}")))?;
    if derived_after != transfer.sender_encrypted_after_balance {
        return Err(ValidationError::malformed(
            "sender after-balance is not balance minus amount",
        ));
    }

    let mut recipient = before[1]
        .unwrap_or_else(|| Account::empty(transfer.recipient, BalanceKind::Encrypted));
    let Balance::Encrypted(recipient_before) = recipient.balance else {
        return Err(ValidationError::malformed("confidential transfer to a plain account"));
    };
    let recipient_after = recipient_before
        .add(&transfer.recipient_encrypted_amount)
        .map_err(|e| ValidationError::malformed(format!("recipient amount: {e}")))?;

    sender.balance = Balance::Encrypted(derived_after);
    sender.nonce = next_nonce(&sender)?;
    recipient.balance = Balance::Encrypted(recipient_after);

    Ok(vec![sender, recipient])
}

fn check_nonce(account: &Account, nonce: u64) -> Result<(), ValidationError> {
    if nonce != account.nonce {
        return Err(ValidationError::NonceMismatch {
            expected: account.nonce,
            got: nonce,
        });
    }
    Ok(())
}

fn next_nonce(account: &Account) -> Result<u64, ValidationError> {
    account
        .nonce
        .checked_add(1)
        .ok_or_else(|| ValidationError::malformed("nonce exhausted"))
}

/// Add a publicly known amount to either balance kind.
fn credit(account: &mut Account, amount: u64) -> Result<(), ValidationError> {
    account.balance = match account.balance {
        Balance::Plain(v) => Balance::Plain(
            v.checked_add(amount)
                .ok_or_else(|| ValidationError::malformed("balance overflow"))?,
        ),
        Balance::Encrypted(ct) => Balance::Encrypted(
            ct.add(&EncryptedBalance::trivial(amount))
                .map_err(|e| ValidationError::malformed(format!("ciphertext: {e}")))?,
        ),
    };
    Ok(())
}
