use kestrel_crypto::RollupPublicKey;

use crate::error::ProofError;
use crate::inputs::ConfidentialStatement;
use crate::witness::ConfidentialWitness;

/// The confidential-transfer relation.
///
/// ```text
///   PK_s == sk·G
///   sender_amount    == enc(PK_s, amount, r)
///   recipient_amount == enc(PK_r, amount, r)
///   sender_after     == sender_before − sender_amount
///   sender_after opens to remaining under sk
///   amount, remaining ∈ [0, 2^64), amount + remaining < 2^64
/// ```
///
/// The last two lines are the range property: the before-balance opens to
/// `amount + remaining`, so `0 <= amount <= balance`.
pub fn check_confidential(
    statement: &ConfidentialStatement,
    witness: &ConfidentialWitness,
) -> Result<(), ProofError> {
    let fail = |reason: &str| Err(ProofError::at(0, reason));

    let sender_pk = statement
        .sender
        .public_key()
        .map_err(|e| ProofError::at(0, format!("sender key: {e}")))?;
    let recipient_pk = statement
        .recipient
        .public_key()
        .map_err(|e| ProofError::at(0, format!("recipient key: {e}")))?;

    if witness.sender_secret.public_key() != sender_pk {
        return fail("secret key does not belong to sender");
    }
    if !opens(&statement.sender_amount, &sender_pk, witness) {
        return fail("sender amount ciphertext does not open to amount");
    }
    if !opens(&statement.recipient_amount, &recipient_pk, witness) {
        return fail("recipient amount ciphertext does not open to amount");
    }

    let derived_after = statement
        .sender_before
        .sub(&statement.sender_amount)
        .map_err(|e| ProofError::at(0, format!("ciphertext: {e}")))?;
    if derived_after != statement.sender_after {
        return fail("after-balance is not before-balance minus amount");
    }

    let remaining_opens = statement
        .sender_after
        .opens_to(&witness.sender_secret, witness.remaining_balance)
        .map_err(|e| ProofError::at(0, format!("ciphertext: {e}")))?;
    if !remaining_opens {
        return fail("after-balance does not open to the remaining balance");
    }
    if witness.amount.checked_add(witness.remaining_balance).is_none() {
        return fail("balance exceeds range");
    }
    Ok(())
}

fn opens(
    ciphertext: &kestrel_crypto::EncryptedBalance,
    public_key: &RollupPublicKey,
    witness: &ConfidentialWitness,
) -> bool {
    ciphertext.is_encryption_of(public_key, witness.amount, &witness.randomness)
}
